// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{InfraError, Result};

/// Resource path of the single print queue.
pub const PRINTER_RESOURCE: &str = "/ipp/print";

/// Settings for one infrastructure printer process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Printer name, also used for `printer-info` and the DNS-SD instance.
    pub printer_name: String,
    /// Host name placed in every advertised URI.
    pub hostname: String,
    /// TCP port for both listening endpoints.
    pub port: u16,
    /// Directory holding one spool file per job.
    pub spool_dir: PathBuf,
    /// Leave spool files on disk when completed jobs are reclaimed.
    pub keep_files: bool,
    /// User name output devices must present via HTTP Basic.
    pub proxy_user: String,
    /// Password output devices must present via HTTP Basic.
    pub proxy_password: String,
    /// Number of `-v` flags given on the command line.
    pub verbosity: u8,
    /// Seconds a completed job stays visible before the sweep removes it.
    pub completed_job_grace_secs: u64,
    /// Poll period of the accept loop while jobs or subscriptions exist.
    pub sweep_interval_secs: u64,
    /// Largest request body accepted, in bytes.
    pub max_request_bytes: usize,
    /// Upper bound on jobs that are not yet terminal.
    pub max_active_jobs: usize,
    /// Register `_ipp._tcp` via mDNS on start.
    pub advertise_dns_sd: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            printer_name: "Infrastructure Printer".into(),
            hostname: default_hostname(),
            port: default_port(),
            spool_dir: default_spool_dir(),
            keep_files: false,
            proxy_user: "test".into(),
            proxy_password: "test123".into(),
            verbosity: 0,
            completed_job_grace_secs: 60,
            sweep_interval_secs: 1,
            max_request_bytes: 64 * 1024 * 1024, // 64 MiB
            max_active_jobs: 500,
            advertise_dns_sd: true,
        }
    }
}

impl ServerConfig {
    /// Canonical `ipp://host:port/ipp/print` URI of the printer.
    pub fn printer_uri(&self) -> String {
        format!("ipp://{}:{}{}", self.hostname, self.port, PRINTER_RESOURCE)
    }

    /// Base `http://host:port/` URI used for the informational links.
    pub fn http_uri(&self) -> String {
        format!("http://{}:{}/", self.hostname, self.port)
    }

    /// Apply a `user[:password]` proxy credential spec.
    ///
    /// Without a colon only the user name changes and the current password
    /// is kept.
    pub fn apply_proxy_spec(&mut self, spec: &str) {
        match spec.split_once(':') {
            Some((user, pass)) => {
                self.proxy_user = user.to_string();
                self.proxy_password = pass.to_string();
            }
            None => self.proxy_user = spec.to_string(),
        }
    }

    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.printer_name.trim().is_empty() {
            return Err(InfraError::Config("printer name must not be empty".into()));
        }
        if self.port == 0 {
            return Err(InfraError::Config("port must be non-zero".into()));
        }
        if self.hostname.is_empty() {
            return Err(InfraError::Config("hostname must not be empty".into()));
        }
        if self.proxy_user.is_empty() {
            return Err(InfraError::Config("proxy user must not be empty".into()));
        }
        Ok(())
    }

    /// Create the spool directory if it does not exist yet.
    pub fn ensure_spool_dir(&self) -> Result<()> {
        create_private_dir(&self.spool_dir)
    }
}

/// `8000 + (uid % 1000)` so that several users can run a server side by side.
pub fn default_port() -> u16 {
    #[cfg(unix)]
    let uid = unsafe { libc::getuid() };
    #[cfg(not(unix))]
    let uid: u32 = 0;

    8000 + (uid % 1000) as u16
}

/// Host name from `$HOSTNAME`, else `localhost`.
pub fn default_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".into())
}

/// `<tmp>/ippserver.<pid>`.
pub fn default_spool_dir() -> PathBuf {
    std::env::temp_dir().join(format!("ippserver.{}", std::process::id()))
}

fn create_private_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)?;
    Ok(())
}

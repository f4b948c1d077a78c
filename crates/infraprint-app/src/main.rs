// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ippinfra: IPP Infrastructure Printer relay.
//
// Entry point.  Parses the command line, initialises logging, starts the
// printer and runs until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use infraprint_core::config::ServerConfig;
use infraprint_core::error::Result;
use infraprint_server::InfraServer;

#[derive(Parser, Debug)]
#[command(name = "ippinfra", version, about = "IPP Infrastructure Printer relay")]
struct Cli {
    /// Spool directory for print files.
    #[arg(short = 'd', value_name = "SPOOL-DIR")]
    spool_dir: Option<PathBuf>,

    /// Keep spool files after completed jobs are reclaimed.
    #[arg(short = 'k')]
    keep_files: bool,

    /// Host name advertised in printer and job URIs.
    #[arg(short = 'n', value_name = "HOSTNAME")]
    hostname: Option<String>,

    /// TCP port to listen on.
    #[arg(short = 'p', value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Output device credentials, `user:password` (or just `user`).
    #[arg(short = 'u', value_name = "USER:PASS")]
    proxy: Option<String>,

    /// More logging; repeat for more.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Printer name, also the DNS-SD instance name.
    printer_name: String,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig {
            printer_name: self.printer_name,
            keep_files: self.keep_files,
            verbosity: self.verbose,
            ..ServerConfig::default()
        };
        if let Some(dir) = self.spool_dir {
            config.spool_dir = dir;
        }
        if let Some(hostname) = self.hostname {
            config.hostname = hostname;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(spec) = self.proxy {
            config.apply_proxy_spec(&spec);
        }
        config
    }
}

/// `RUST_LOG` if set, else a level from the `-v` count.
fn log_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    })
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => error!(error = %e, "cannot install SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C");
    }
}

async fn run(config: ServerConfig) -> Result<()> {
    let mut shown = config.clone();
    shown.proxy_password = "********".into();
    debug!(config = %serde_json::to_string(&shown)?, "effective configuration");

    let mut server = InfraServer::new(config);
    server.start().await?;
    info!(uri = %server.printer().uri, "ippinfra ready");

    shutdown_signal().await;
    info!("shutdown requested");
    server.stop().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            // Printing help or a usage error to a closed stream is not worth reporting.
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .init();

    let config = cli.into_config();
    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "ippinfra failed");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_flags() {
        let cli = Cli::try_parse_from([
            "ippinfra", "-d", "/var/spool/relay", "-k", "-n", "relay.example", "-p", "8631",
            "-u", "device:s3cret", "-vv", "Office Relay",
        ])
        .expect("flags should parse");
        assert_eq!(cli.verbose, 2);

        let config = cli.into_config();
        assert_eq!(config.printer_name, "Office Relay");
        assert_eq!(config.spool_dir, PathBuf::from("/var/spool/relay"));
        assert!(config.keep_files);
        assert_eq!(config.hostname, "relay.example");
        assert_eq!(config.port, 8631);
        assert_eq!(config.proxy_user, "device");
        assert_eq!(config.proxy_password, "s3cret");
        assert_eq!(config.printer_uri(), "ipp://relay.example:8631/ipp/print");
    }

    #[test]
    fn user_without_password_keeps_default_password() {
        let cli = Cli::try_parse_from(["ippinfra", "-u", "device", "Relay"]).expect("parse");
        let config = cli.into_config();
        assert_eq!(config.proxy_user, "device");
        assert_eq!(config.proxy_password, ServerConfig::default().proxy_password);
    }

    #[test]
    fn defaults_apply_without_flags() {
        let config = Cli::try_parse_from(["ippinfra", "Relay"]).expect("parse").into_config();
        assert_eq!(config.port, infraprint_core::config::default_port());
        assert!(!config.keep_files);
        assert_eq!(config.verbosity, 0);
    }

    #[test]
    fn usage_errors_and_help() {
        let err = Cli::try_parse_from(["ippinfra"]).expect_err("printer name is required");
        assert!(err.use_stderr());

        let err = Cli::try_parse_from(["ippinfra", "-p", "0", "Relay"]).expect_err("port 0");
        assert!(err.use_stderr());

        let help = Cli::try_parse_from(["ippinfra", "-h"]).expect_err("help short-circuits");
        assert_eq!(help.kind(), clap::error::ErrorKind::DisplayHelp);
        assert!(!help.use_stderr());
    }
}

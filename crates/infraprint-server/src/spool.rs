// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spool files: one per job, written once when the document arrives and read
// back when an output device fetches it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use infraprint_core::error::{InfraError, Result};

use crate::job::{spool_filename, Job};

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write `data` to the job's spool file and record the file, its format and
/// its digest on the job.  A partially written file is removed on failure.
#[instrument(skip(job, data), fields(job_id = job.id, bytes = data.len()))]
pub fn spool_document(spool_dir: &Path, job: &Job, format: &str, data: &[u8]) -> Result<PathBuf> {
    let path = spool_filename(spool_dir, job.id, &job.name, format);

    if let Err(e) = write_private(&path, data) {
        warn!(path = %path.display(), error = %e, "spool write failed");
        if let Err(rm) = std::fs::remove_file(&path) {
            if rm.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %rm, "failed to remove partial spool file");
            }
        }
        return Err(InfraError::Io(e));
    }

    let digest = sha256_hex(data);
    debug!(path = %path.display(), sha256 = %digest, "document spooled");

    let mut job_data = job.data_mut();
    job_data.filename = Some(path.clone());
    job_data.format = Some(format.to_string());
    job_data.document_sha256 = Some(digest);
    Ok(path)
}

fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// The spooled document bytes of `job`.
pub fn read_document(job: &Job) -> Result<Vec<u8>> {
    let path = job
        .data()
        .filename
        .clone()
        .ok_or_else(|| InfraError::DocumentFetch(format!("job {} has no document", job.id)))?;
    Ok(std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IppAttributeGroup, TAG_JOB_ATTRIBUTES};
    use chrono::Utc;

    fn job(id: i32) -> Job {
        let now = Utc::now();
        Job::new(
            id,
            "ipp://localhost:8631/ipp/print",
            "Scan 01",
            "alice",
            50,
            IppAttributeGroup::new(TAG_JOB_ATTRIBUTES),
            now,
            now,
        )
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn spool_writes_file_and_records_it() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let job = job(3);
        let path = spool_document(tmp.path(), &job, "application/pdf", b"%PDF-1.7 body").expect("spool");

        assert_eq!(path, tmp.path().join("3-scan_01.pdf"));
        assert_eq!(std::fs::read(&path).expect("read back"), b"%PDF-1.7 body");

        let data = job.data();
        assert_eq!(data.filename.as_deref(), Some(path.as_path()));
        assert_eq!(data.format.as_deref(), Some("application/pdf"));
        assert_eq!(data.document_sha256.as_deref(), Some(sha256_hex(b"%PDF-1.7 body").as_str()));
        drop(data);

        assert_eq!(read_document(&job).expect("read document"), b"%PDF-1.7 body");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn spool_into_missing_directory_fails_cleanly() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let job = job(4);
        let err = spool_document(&tmp.path().join("missing"), &job, "image/png", b"x").expect_err("no dir");
        assert!(matches!(err, InfraError::Io(_)));
        assert!(job.data().filename.is_none());
    }

    #[test]
    fn read_without_document_is_an_error() {
        assert!(matches!(read_document(&job(5)), Err(InfraError::DocumentFetch(_))));
    }
}

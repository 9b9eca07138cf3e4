// SPDX-License-Identifier: MIT OR Apache-2.0
//! `latest/` <-> `archive/<timestamp>/` rotation (spec §4.2 "On-disk
//! layout").

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};

/// Moves the contents of `<log_root>/<service>/latest/` into
/// `<log_root>/<service>/archive/<yyyymmdd_hhmmss>/` and recreates an empty
/// `latest/`.
///
/// Returns the archive directory path if anything was rotated, or `None` if
/// `latest/` was absent or empty (rotation is then a no-op).
pub fn rotate(log_root: &Path, service: &str) -> io::Result<Option<PathBuf>> {
    let latest = log_root.join(service).join("latest");
    if !latest.exists() || std::fs::read_dir(&latest)?.next().is_none() {
        std::fs::create_dir_all(&latest)?;
        return Ok(None);
    }

    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let archive = log_root.join(service).join("archive").join(stamp);
    std::fs::create_dir_all(archive.parent().expect("archive has a parent"))?;
    std::fs::rename(&latest, &archive)?;
    std::fs::create_dir_all(&latest)?;
    Ok(Some(archive))
}

/// Path of the primary service log file under `latest/`.
pub fn service_log_path(log_root: &Path, service: &str) -> PathBuf {
    log_root.join(service).join("latest").join(format!("{service}.log"))
}

/// Path of a subprocess output log file under `latest/subprocess/`.
pub fn subprocess_log_path(log_root: &Path, service: &str, job_id: &str, stream: &str) -> PathBuf {
    log_root
        .join(service)
        .join("latest")
        .join("subprocess")
        .join(format!("{job_id}.{stream}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rotate_is_noop_when_latest_is_absent() {
        let dir = tempdir().unwrap();
        let result = rotate(dir.path(), "api").unwrap();
        assert!(result.is_none());
        assert!(dir.path().join("api/latest").is_dir());
    }

    #[test]
    fn rotate_moves_content_and_recreates_latest() {
        let dir = tempdir().unwrap();
        let latest = dir.path().join("api/latest");
        std::fs::create_dir_all(&latest).unwrap();
        std::fs::write(latest.join("api.log"), "hello\n").unwrap();

        let archived = rotate(dir.path(), "api").unwrap().expect("should rotate");
        assert!(archived.join("api.log").exists());
        assert!(latest.is_dir());
        assert!(std::fs::read_dir(&latest).unwrap().next().is_none());
    }
}

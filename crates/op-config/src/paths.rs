// SPDX-License-Identifier: MIT OR Apache-2.0
//! `volume_root` resolution and the fixed storage-contract subdirectories
//! (spec §6), extended from
//! `original_source/packages/shared/src/config.py::_get_path`.

use std::path::{Path, PathBuf};

/// The RunPod network-volume mount point, checked ahead of the local
/// workspace mount.
pub const RUNPOD_VOLUME_BASE: &str = "/runpod-volume";
/// The local container workspace mount point.
pub const WORKSPACE_BASE: &str = "/workspace";
/// Local-development fallback when neither mount exists.
pub const LOCAL_FALLBACK: &str = "./data";

/// Resolves `volume_root` using the priority chain spec §6 names: an
/// explicit override, then `<runpod>/<app>` if the RunPod volume is
/// mounted, then `<workspace>/<app>` if the workspace mount exists,
/// else a local fallback directory.
///
/// `exists` is injected so tests can simulate a mounted volume without
/// touching the real filesystem root.
pub fn resolve_volume_root(explicit: Option<&str>, app: &str, exists: impl Fn(&Path) -> bool) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }
    let runpod = Path::new(RUNPOD_VOLUME_BASE);
    if exists(runpod) {
        return runpod.join(app);
    }
    let workspace = Path::new(WORKSPACE_BASE);
    if exists(workspace) {
        return workspace.join(app);
    }
    PathBuf::from(LOCAL_FALLBACK)
}

/// The fixed set of subdirectories the storage contract guarantees exist
/// under `volume_root`, excluding `artifacts/jobs/<job_id>/...` which is
/// created per job rather than up front.
pub const STORAGE_CONTRACT_DIRS: &[&str] =
    &["characters", "uploads", "datasets", "synthetic", "loras", "outputs", "cache", "logs/jobs", "uploaded_loras"];

/// Paths into the storage contract rooted at `volume_root`.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    /// Wraps `volume_root` for path resolution.
    pub fn new(volume_root: PathBuf) -> Self {
        Self { root: volume_root }
    }

    /// The `volume_root` itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<volume_root>/characters/`.
    pub fn characters_dir(&self) -> PathBuf {
        self.root.join("characters")
    }

    /// `<volume_root>/uploads/`.
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// `<volume_root>/datasets/`.
    pub fn datasets_dir(&self) -> PathBuf {
        self.root.join("datasets")
    }

    /// `<volume_root>/synthetic/`.
    pub fn synthetic_dir(&self) -> PathBuf {
        self.root.join("synthetic")
    }

    /// `<volume_root>/loras/`.
    pub fn loras_dir(&self) -> PathBuf {
        self.root.join("loras")
    }

    /// `<volume_root>/outputs/`.
    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    /// `<volume_root>/cache/`.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// `<volume_root>/logs/jobs/`, where per-job JSONL logs live.
    pub fn jobs_log_dir(&self) -> PathBuf {
        self.root.join("logs").join("jobs")
    }

    /// `<volume_root>/uploaded_loras/`.
    pub fn uploaded_loras_dir(&self) -> PathBuf {
        self.root.join("uploaded_loras")
    }

    /// `<volume_root>/artifacts/jobs/<job_id>/samples/`.
    pub fn samples_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("artifacts").join("jobs").join(job_id).join("samples")
    }

    /// `<volume_root>/artifacts/jobs/<job_id>/checkpoints/`.
    pub fn checkpoints_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("artifacts").join("jobs").join(job_id).join("checkpoints")
    }

    /// Creates every fixed storage-contract directory that does not yet
    /// exist. Per-job artifact directories are created lazily by the
    /// executor instead.
    pub async fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in STORAGE_CONTRACT_DIRS {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_override_wins_over_any_mount() {
        let root = resolve_volume_root(Some("/custom/path"), "job-plane", |_| true);
        assert_eq!(root, PathBuf::from("/custom/path"));
    }

    #[test]
    fn prefers_runpod_mount_over_workspace() {
        let root = resolve_volume_root(None, "job-plane", |_| true);
        assert_eq!(root, PathBuf::from("/runpod-volume/job-plane"));
    }

    #[test]
    fn falls_back_to_workspace_when_runpod_absent() {
        let root = resolve_volume_root(None, "job-plane", |p| p == Path::new(WORKSPACE_BASE));
        assert_eq!(root, PathBuf::from("/workspace/job-plane"));
    }

    #[test]
    fn falls_back_to_local_data_when_neither_mount_exists() {
        let root = resolve_volume_root(None, "job-plane", |_| false);
        assert_eq!(root, PathBuf::from("./data"));
    }

    #[tokio::test]
    async fn ensure_directories_creates_the_full_contract() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(dir.path().to_path_buf());
        paths.ensure_directories().await.unwrap();
        for d in STORAGE_CONTRACT_DIRS {
            assert!(dir.path().join(d).is_dir(), "missing {d}");
        }
    }
}

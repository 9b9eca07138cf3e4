// SPDX-License-Identifier: MIT OR Apache-2.0
//! File-based job store (spec §4.3 "Job records").
//!
//! One JSON file per job, directly in the teacher's `ReceiptStore`
//! file-per-entity idiom: save/load/list over a directory, an in-memory
//! index to avoid rescanning the directory on every read.

use anyhow::{Context, Result};
use op_core::{JobId, JobRecord, JobStatus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Owns [`JobRecord`]s exclusively; nothing else mutates a job record
/// directly after hand-off (spec §3 "Ownership").
pub struct JobStore {
    root: PathBuf,
    index: RwLock<BTreeMap<String, JobRecord>>,
}

impl JobStore {
    /// Opens (without yet reading) a store rooted at `<volume_root>/jobs/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), index: RwLock::new(BTreeMap::new()) }
    }

    fn path_for(&self, id: &JobId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Persists `record`, creating the store directory if needed.
    pub async fn save(&self, record: JobRecord) -> Result<()> {
        let path = self.path_for(&record.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create job store dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&record)?;
        tokio::fs::write(&path, json).await.with_context(|| format!("write job record to {}", path.display()))?;
        self.index.write().await.insert(record.id.as_str().to_string(), record);
        Ok(())
    }

    /// Reads a job record, preferring the in-memory index and falling back
    /// to disk.
    pub async fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
        if let Some(record) = self.index.read().await.get(id.as_str()) {
            return Ok(Some(record.clone()));
        }
        let path = self.path_for(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let record: JobRecord = serde_json::from_str(&json)?;
                self.index.write().await.insert(id.as_str().to_string(), record.clone());
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("read job record"),
        }
    }

    /// Applies a status transition plus an arbitrary progress/output patch,
    /// read-modify-write, then persists.
    ///
    /// Returns `Ok(None)` if no such job exists.
    pub async fn update_status<F>(&self, id: &JobId, status: JobStatus, patch: F) -> Result<Option<JobRecord>>
    where
        F: FnOnce(&mut JobRecord),
    {
        let Some(mut record) = self.get(id).await? else {
            return Ok(None);
        };
        record.status = status;
        patch(&mut record);
        self.save(record.clone()).await?;
        Ok(Some(record))
    }

    /// Lists job records, most-recently-created first, optionally filtered
    /// by `job_type`, capped at `limit`.
    pub async fn list(&self, job_type: Option<op_core::JobType>, limit: usize) -> Result<Vec<JobRecord>> {
        self.hydrate_index_if_empty().await?;
        let index = self.index.read().await;
        let mut records: Vec<JobRecord> = index
            .values()
            .filter(|r| job_type.is_none_or(|t| r.job_type == t))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn hydrate_index_if_empty(&self) -> Result<()> {
        if !self.index.read().await.is_empty() {
            return Ok(());
        }
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).context("read job store dir"),
        };
        let mut index = self.index.write().await;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = tokio::fs::read_to_string(&path).await?;
            if let Ok(record) = serde_json::from_str::<JobRecord>(&json) {
                index.insert(record.id.as_str().to_string(), record);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::JobType;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let record = JobRecord::new_queued(JobType::Training, serde_json::json!({"steps": 100}), "c1");
        let id = record.id.clone();
        store.save(record).await.unwrap();

        let fetched = store.get(&id).await.unwrap().expect("present");
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.status, op_core::JobStatus::Queued);
    }

    #[tokio::test]
    async fn get_missing_job_returns_none() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let missing = JobId::from_raw("train-000000000000");
        assert!(store.get(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_applies_patch_and_persists() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let record = JobRecord::new_queued(JobType::Generation, serde_json::json!({}), "c1");
        let id = record.id.clone();
        store.save(record).await.unwrap();

        store
            .update_status(&id, JobStatus::Running, |r| {
                r.started_at = Some(chrono::Utc::now());
                r.progress.current_step = 1;
            })
            .await
            .unwrap();

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Running);
        assert!(fetched.started_at.is_some());
        assert_eq!(fetched.progress.current_step, 1);
    }

    #[tokio::test]
    async fn list_is_filtered_by_type_and_newest_first() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());
        for _ in 0..2 {
            store
                .save(JobRecord::new_queued(JobType::Training, serde_json::json!({}), "c1"))
                .await
                .unwrap();
        }
        store
            .save(JobRecord::new_queued(JobType::Generation, serde_json::json!({}), "c1"))
            .await
            .unwrap();

        let training = store.list(Some(JobType::Training), 10).await.unwrap();
        assert_eq!(training.len(), 2);
        assert!(training.iter().all(|r| r.job_type == JobType::Training));

        let all = store.list(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn list_reads_from_disk_when_index_is_cold() {
        let dir = tempdir().unwrap();
        {
            let store = JobStore::new(dir.path());
            store
                .save(JobRecord::new_queued(JobType::Training, serde_json::json!({}), "c1"))
                .await
                .unwrap();
        }
        let fresh_store = JobStore::new(dir.path());
        let records = fresh_store.list(None, 10).await.unwrap();
        assert_eq!(records.len(), 1);
    }
}

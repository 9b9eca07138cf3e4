// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Job store and stream queue with consumer-group dispatch (C3).

/// Generic opaque-JSON auxiliary entity store.
pub mod collaborator;
/// Capped per-job progress history ring.
pub mod progress_stream;
/// File-per-job durable record store.
pub mod store;
/// Two-stream, one-consumer-group queue with a pending-entries-list.
pub mod stream;

pub use collaborator::CollaboratorStore;
pub use progress_stream::ProgressSubStream;
pub use store::JobStore;
pub use stream::{StreamQueue, VISIBILITY_TIMEOUT};

use std::path::Path;
use std::sync::Arc;

/// Convenience bundle of the three stores a worker or API process needs to
/// touch C3 (spec §4.3 groups Job Store, Stream Queue, and Progress
/// sub-stream under one component).
pub struct QueuePlane {
    /// Durable job records.
    pub jobs: JobStore,
    /// Training/generation dispatch streams.
    pub streams: StreamQueue,
    /// Per-job progress history, shared with a [`op_bus`]-shaped
    /// stream-backed bus when one process runs as both API and worker.
    pub progress: Arc<ProgressSubStream>,
    /// Character/LoRA/collaborator metadata.
    pub collaborators: CollaboratorStore,
}

impl QueuePlane {
    /// Opens all four stores rooted under `volume_root`.
    pub fn new(volume_root: &Path) -> Self {
        Self {
            jobs: JobStore::new(volume_root.join("jobs")),
            streams: StreamQueue::new(),
            progress: Arc::new(ProgressSubStream::default()),
            collaborators: CollaboratorStore::new(volume_root.join("collaborators")),
        }
    }

    /// Re-enqueues every job record still `Queued` on disk, oldest-first per
    /// stream, and returns how many were recovered.
    ///
    /// `StreamQueue` itself is in-memory and built fresh by [`Self::new`];
    /// `JobStore`'s on-disk record is the durable source of truth, so a
    /// process that starts with jobs already sitting at `Queued` (the
    /// previous process crashed or restarted before a worker drained them)
    /// rebuilds the dispatch queue from it instead of leaving those jobs
    /// stuck with nothing left to consume them. Call this once at process
    /// start, before the worker loop begins consuming.
    pub async fn recover_queued_jobs(&self) -> anyhow::Result<usize> {
        let mut recovered = 0;
        for job_type in [op_core::JobType::Training, op_core::JobType::Generation] {
            let mut queued: Vec<_> = self
                .jobs
                .list(Some(job_type), usize::MAX)
                .await?
                .into_iter()
                .filter(|record| record.status == op_core::JobStatus::Queued)
                .collect();
            queued.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            for record in queued {
                self.streams
                    .submit(job_type, record.correlation_id.clone(), serde_json::json!({ "job_id": record.id.as_str() }))
                    .await;
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::{JobRecord, JobType};
    use tempfile::tempdir;

    #[tokio::test]
    async fn recover_queued_jobs_re_enqueues_in_submission_order() {
        let dir = tempdir().unwrap();
        let volume_root = dir.path();

        // Simulate a prior process: job records saved to disk, nothing ever
        // consumed from the (in-memory, now-gone) stream.
        let first = JobRecord::new_queued(JobType::Training, serde_json::json!({"steps": 10}), "c1");
        let second = JobRecord::new_queued(JobType::Training, serde_json::json!({"steps": 20}), "c2");
        let running = JobRecord::new_queued(JobType::Generation, serde_json::json!({}), "c3");
        let mut running = running;
        running.status = op_core::JobStatus::Running;
        {
            let store = JobStore::new(volume_root.join("jobs"));
            store.save(first.clone()).await.unwrap();
            store.save(second.clone()).await.unwrap();
            store.save(running).await.unwrap();
        }

        let plane = QueuePlane::new(volume_root);
        let recovered = plane.recover_queued_jobs().await.unwrap();
        assert_eq!(recovered, 2, "only the two still-queued training jobs recover");

        let delivered = plane.streams.consume(JobType::Training, 10).await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].payload["job_id"], first.id.as_str());
        assert_eq!(delivered[1].payload["job_id"], second.id.as_str());

        assert!(plane.streams.consume(JobType::Generation, 10).await.is_empty(), "running job is not re-enqueued");
    }

    #[tokio::test]
    async fn recover_queued_jobs_is_a_no_op_on_an_empty_store() {
        let dir = tempdir().unwrap();
        let plane = QueuePlane::new(dir.path());
        assert_eq!(plane.recover_queued_jobs().await.unwrap(), 0);
    }
}

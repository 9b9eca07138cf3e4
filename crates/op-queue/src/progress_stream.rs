// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job progress sub-stream (spec §4.3 "Progress sub-stream"): a capped
//! ring buffer of the most recent [`op_core::ProgressEvent`]s for one
//! `job_id`, shared between the queue (which records them) and `op-bus`
//! (which replays them to late SSE subscribers as catch-up history).

use op_core::ProgressEvent;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Default number of events retained per job (spec §4.4 "history ring,
/// default capacity 100").
pub const DEFAULT_CAPACITY: usize = 100;

struct JobRing {
    events: VecDeque<ProgressEvent>,
    capacity: usize,
}

impl JobRing {
    fn new(capacity: usize) -> Self {
        Self { events: VecDeque::with_capacity(capacity), capacity }
    }

    fn push(&mut self, event: ProgressEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Append-and-replay storage for per-job progress history, independent of
/// any live subscriber (spec §4.4 "history survives across subscriber
/// connect/disconnect cycles").
pub struct ProgressSubStream {
    capacity: usize,
    rings: RwLock<HashMap<String, JobRing>>,
}

impl Default for ProgressSubStream {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ProgressSubStream {
    /// Builds a store where every job's ring holds at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, rings: RwLock::new(HashMap::new()) }
    }

    /// Records `event`, evicting the oldest entry for this job if its ring
    /// is full.
    pub async fn record(&self, job_id: &str, event: ProgressEvent) {
        let mut rings = self.rings.write().await;
        rings.entry(job_id.to_string()).or_insert_with(|| JobRing::new(self.capacity)).push(event);
    }

    /// Returns all retained events for `job_id`, oldest first.
    pub async fn history(&self, job_id: &str) -> Vec<ProgressEvent> {
        self.rings.read().await.get(job_id).map(|ring| ring.events.iter().cloned().collect()).unwrap_or_default()
    }

    /// Drops a job's ring entirely (spec §4.4 "history is released once the
    /// job is terminal and no subscriber remains").
    pub async fn clear(&self, job_id: &str) {
        self.rings.write().await.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::{JobId, JobStatus, JobType, TrainingStage};

    fn event(job_id: &JobId, step: u64) -> ProgressEvent {
        ProgressEvent {
            job_id: job_id.clone(),
            correlation_id: None,
            status: JobStatus::Running,
            stage: TrainingStage::Training,
            step,
            steps_total: 100,
            progress_pct: step as f64,
            loss: None,
            lr: None,
            eta_seconds: None,
            gpu: None,
            message: format!("step {step}"),
            sample_path: None,
            checkpoint_path: None,
            error: None,
            error_type: None,
            error_stack: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn history_is_empty_for_unknown_job() {
        let stream = ProgressSubStream::default();
        assert!(stream.history("train-unknown").await.is_empty());
    }

    #[tokio::test]
    async fn history_preserves_order() {
        let stream = ProgressSubStream::default();
        let job_id = JobId::new(JobType::Training);
        for step in 0..5 {
            stream.record(job_id.as_str(), event(&job_id, step)).await;
        }
        let history = stream.history(job_id.as_str()).await;
        let steps: Vec<u64> = history.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn ring_evicts_oldest_past_capacity() {
        let stream = ProgressSubStream::with_capacity(3);
        let job_id = JobId::new(JobType::Training);
        for step in 0..5 {
            stream.record(job_id.as_str(), event(&job_id, step)).await;
        }
        let history = stream.history(job_id.as_str()).await;
        let steps: Vec<u64> = history.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn clear_removes_job_history() {
        let stream = ProgressSubStream::default();
        let job_id = JobId::new(JobType::Training);
        stream.record(job_id.as_str(), event(&job_id, 0)).await;
        stream.clear(job_id.as_str()).await;
        assert!(stream.history(job_id.as_str()).await.is_empty());
    }

    #[tokio::test]
    async fn rings_are_independent_per_job() {
        let stream = ProgressSubStream::default();
        let job_a = JobId::new(JobType::Training);
        let job_b = JobId::new(JobType::Training);
        stream.record(job_a.as_str(), event(&job_a, 1)).await;
        stream.record(job_b.as_str(), event(&job_b, 2)).await;
        assert_eq!(stream.history(job_a.as_str()).await.len(), 1);
        assert_eq!(stream.history(job_b.as_str()).await.len(), 1);
    }
}

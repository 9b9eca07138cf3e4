// SPDX-License-Identifier: MIT OR Apache-2.0
//! A [`ProgressBus`] implementation backed by `op-queue`'s progress
//! sub-stream instead of an in-process broadcast channel (spec §4.4 "a
//! second implementation may back the bus with the stream store directly,
//! selected once at startup").
//!
//! Useful when the API and worker run as separate processes sharing one
//! volume: publishing only requires appending to the sub-stream; subscribing
//! polls forward from a cursor rather than holding a live channel handle.

use crate::{BusEvent, ProgressBus};
use async_trait::async_trait;
use op_core::ProgressEvent;
use op_queue::ProgressSubStream;
use std::sync::Arc;
use std::time::Duration;

/// How often a polling subscription checks the sub-stream for new events.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Publishes into and replays from a shared [`ProgressSubStream`].
pub struct StreamBackedBus {
    stream: Arc<ProgressSubStream>,
}

impl StreamBackedBus {
    /// Wraps an existing sub-stream (typically shared with the worker that
    /// writes it).
    pub fn new(stream: Arc<ProgressSubStream>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl ProgressBus for StreamBackedBus {
    async fn publish(&self, event: ProgressEvent) {
        let job_id = event.job_id.as_str().to_string();
        self.stream.record(&job_id, event).await;
    }

    async fn history(&self, job_id: &str) -> Vec<ProgressEvent> {
        self.stream.history(job_id).await
    }
}

impl StreamBackedBus {
    /// Builds a cursor-based polling subscription for `job_id`, starting
    /// after whatever history already exists (a fresh subscriber always
    /// replays current history first, then polls forward).
    pub async fn poll_subscribe(&self, job_id: &str) -> PollSubscription {
        let history = self.stream.history(job_id).await;
        let seen = history.len();
        PollSubscription { stream: Arc::clone(&self.stream), job_id: job_id.to_string(), seen, backlog: history, done: false }
    }
}

/// A cursor-based subscription over [`StreamBackedBus`].
pub struct PollSubscription {
    stream: Arc<ProgressSubStream>,
    job_id: String,
    seen: usize,
    backlog: Vec<ProgressEvent>,
    done: bool,
}

impl PollSubscription {
    /// Returns the next unseen event, polling until one appears or the
    /// subscription has gone idle for 30s (a [`BusEvent::Keepalive`]).
    ///
    /// Returns `None` once a terminal event has been delivered.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        if self.done {
            return None;
        }
        if !self.backlog.is_empty() {
            let event = self.backlog.remove(0);
            if event.stage.is_terminal() {
                self.done = true;
            }
            return Some(BusEvent::Progress(event));
        }

        let deadline = tokio::time::Instant::now() + crate::in_process::KEEPALIVE_INTERVAL;
        loop {
            let history = self.stream.history(&self.job_id).await;
            if history.len() > self.seen {
                let event = history[self.seen].clone();
                self.seen += 1;
                if event.stage.is_terminal() {
                    self.done = true;
                }
                return Some(BusEvent::Progress(event));
            }
            if tokio::time::Instant::now() >= deadline {
                return Some(BusEvent::Keepalive);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::{JobId, JobStatus, JobType, TrainingStage};

    fn event(job_id: &JobId, stage: TrainingStage, step: u64) -> ProgressEvent {
        ProgressEvent {
            job_id: job_id.clone(),
            correlation_id: None,
            status: if stage.is_terminal() { JobStatus::Completed } else { JobStatus::Running },
            stage,
            step,
            steps_total: 10,
            progress_pct: step as f64,
            loss: None,
            lr: None,
            eta_seconds: None,
            gpu: None,
            message: String::new(),
            sample_path: None,
            checkpoint_path: None,
            error: None,
            error_type: None,
            error_stack: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn poll_subscribe_replays_existing_history_first() {
        let stream = Arc::new(ProgressSubStream::default());
        let bus = StreamBackedBus::new(Arc::clone(&stream));
        let job_id = JobId::new(JobType::Training);
        bus.publish(event(&job_id, TrainingStage::Training, 0)).await;
        bus.publish(event(&job_id, TrainingStage::Training, 1)).await;

        let mut sub = bus.poll_subscribe(job_id.as_str()).await;
        assert!(matches!(sub.recv().await, Some(BusEvent::Progress(e)) if e.step == 0));
        assert!(matches!(sub.recv().await, Some(BusEvent::Progress(e)) if e.step == 1));
    }

    #[tokio::test]
    async fn poll_subscribe_sees_new_events_after_replay() {
        let stream = Arc::new(ProgressSubStream::default());
        let bus = StreamBackedBus::new(Arc::clone(&stream));
        let job_id = JobId::new(JobType::Training);
        let mut sub = bus.poll_subscribe(job_id.as_str()).await;

        bus.publish(event(&job_id, TrainingStage::Completed, 1)).await;
        let received = sub.recv().await;
        assert!(matches!(received, Some(BusEvent::Progress(e)) if e.stage.is_terminal()));
        assert!(sub.recv().await.is_none());
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory stream queue with a single consumer group per stream
//! (spec §4.3 "Queue", §9 "re-architected: represent the stream as an
//! explicit append log with a PEL, not a borrowed Redis primitive").
//!
//! Each named stream (`jobs:training`, `jobs:generation`) keeps an
//! append-only log of [`op_core::QueueMessage`]s plus a single consumer
//! group's delivery cursor and pending-entries-list, mirroring the
//! `XADD`/`XREADGROUP`/`XACK` trio the source system built on Redis streams,
//! without depending on Redis.

use chrono::Utc;
use op_core::{JobType, QueueMessage};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Entries delivered but not yet acknowledged, keyed by message ID.
#[derive(Debug, Clone)]
struct PendingEntry {
    message: QueueMessage,
    delivered_at: Instant,
    delivery_count: u32,
}

struct StreamState {
    log: VecDeque<QueueMessage>,
    next_offset: u64,
    /// `>`-cursor: offset of the next never-delivered message.
    cursor: u64,
    pending: BTreeMap<String, PendingEntry>,
}

impl StreamState {
    fn new() -> Self {
        Self { log: VecDeque::new(), next_offset: 0, cursor: 0, pending: BTreeMap::new() }
    }
}

/// How long an unacknowledged delivery stays claimed before it becomes
/// eligible for reclaim by another consumer (spec §9 "visibility timeout").
///
/// Set to four times the default long-poll block (`block_ms * 4`, per the
/// Design Notes), so a consumer that is merely slow to ack within one poll
/// cycle doesn't immediately lose its claim to a competing worker.
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Two independent streams (`jobs:training`, `jobs:generation`), each with
/// exactly one consumer group (`"workers"`), `>`-cursor consume semantics,
/// and a pending-entries-list for at-least-once delivery.
pub struct StreamQueue {
    training: Arc<Mutex<StreamState>>,
    generation: Arc<Mutex<StreamState>>,
}

impl Default for StreamQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamQueue {
    /// Builds two empty streams. Consumer-group creation is implicit and
    /// idempotent here (spec §4.3 "ensure_consumer_groups must tolerate the
    /// group already existing") since there is exactly one group per stream
    /// and no separate creation call is observable.
    pub fn new() -> Self {
        Self {
            training: Arc::new(Mutex::new(StreamState::new())),
            generation: Arc::new(Mutex::new(StreamState::new())),
        }
    }

    fn state_for(&self, job_type: JobType) -> &Arc<Mutex<StreamState>> {
        match job_type {
            JobType::Training => &self.training,
            JobType::Generation => &self.generation,
        }
    }

    /// Appends a message to the stream selected by `job_type`, returning its
    /// assigned ID.
    pub async fn submit(&self, job_type: JobType, correlation_id: impl Into<String>, payload: serde_json::Value) -> String {
        let state = self.state_for(job_type);
        let mut state = state.lock().await;
        let offset = state.next_offset;
        state.next_offset += 1;
        let id = format!("{offset}-0");
        let message = QueueMessage {
            id: id.clone(),
            job_type,
            correlation_id: correlation_id.into(),
            created_at: Utc::now(),
            payload,
        };
        state.log.push_back(message);
        id
    }

    /// Delivers up to `count` never-delivered messages (the `>`-cursor
    /// semantics of `XREADGROUP ... STREAMS <stream> >`), moving each into
    /// the pending-entries-list.
    pub async fn consume(&self, job_type: JobType, count: usize) -> Vec<QueueMessage> {
        let state = self.state_for(job_type);
        let mut state = state.lock().await;
        let cursor = state.cursor;
        let messages: Vec<QueueMessage> = state
            .log
            .iter()
            .filter(|m| m.id.split('-').next().and_then(|n| n.parse::<u64>().ok()).is_some_and(|o| o >= cursor))
            .take(count)
            .cloned()
            .collect();

        for message in &messages {
            let offset: u64 = message.id.split('-').next().unwrap().parse().unwrap();
            state.cursor = state.cursor.max(offset + 1);
            state.pending.insert(
                message.id.clone(),
                PendingEntry { message: message.clone(), delivered_at: Instant::now(), delivery_count: 1 },
            );
        }
        messages
    }

    /// Removes a message from the pending-entries-list once its work is
    /// durably recorded (spec §4.3 "acknowledge after state transition is
    /// persisted, not before"). A message that is already acknowledged or
    /// was never delivered is a no-op, not a failure (spec §4.3 "Failure
    /// semantics": "`acknowledge` on an already-acked message is a no-op").
    pub async fn acknowledge(&self, job_type: JobType, message_id: &str) {
        let state = self.state_for(job_type);
        state.lock().await.pending.remove(message_id);
    }

    /// Returns pending entries whose visibility timeout has elapsed,
    /// re-stamping their delivery time and bumping the delivery count so a
    /// caller can redeliver them to a different worker (spec §9 "claim /
    /// reclaim").
    pub async fn reclaim_expired(&self, job_type: JobType) -> Vec<QueueMessage> {
        let state = self.state_for(job_type);
        let mut state = state.lock().await;
        let now = Instant::now();
        let expired_ids: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.delivered_at) >= VISIBILITY_TIMEOUT)
            .map(|(id, _)| id.clone())
            .collect();

        let mut reclaimed = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(entry) = state.pending.get_mut(&id) {
                entry.delivered_at = now;
                entry.delivery_count += 1;
                reclaimed.push(entry.message.clone());
            }
        }
        reclaimed
    }

    /// Number of entries still awaiting acknowledgement.
    pub async fn pending_count(&self, job_type: JobType) -> usize {
        self.state_for(job_type).lock().await.pending.len()
    }

    /// Number of messages ever appended to this stream.
    pub async fn len(&self, job_type: JobType) -> usize {
        self.state_for(job_type).lock().await.log.len()
    }
}

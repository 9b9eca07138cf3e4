// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process, broadcast-style progress bus, generalized from the teacher's
//! `EventBus` to be keyed per `job_id` and to guarantee terminal delivery
//! under back-pressure via a coalescing-plus-terminal-slot strategy (spec
//! §4.4, Design Notes "in-memory subscriber fan-out with back-pressure").

use crate::{BusEvent, ProgressBus};
use async_trait::async_trait;
use op_core::ProgressEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

/// Events older than this with no subscriber activity trigger a keepalive
/// sentinel (spec §4.4 "on idle (>30s), yield a keepalive").
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Default)]
struct SlotState {
    latest: Option<ProgressEvent>,
    terminal: Option<ProgressEvent>,
}

struct SubscriberHandle {
    slot: StdMutex<SlotState>,
    notify: Notify,
}

struct JobChannel {
    history: std::collections::VecDeque<ProgressEvent>,
    subscribers: Vec<Arc<SubscriberHandle>>,
}

impl JobChannel {
    fn new() -> Self {
        Self { history: std::collections::VecDeque::new(), subscribers: Vec::new() }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    total_published: AtomicU64,
    dropped_events: AtomicU64,
}

/// Statistics mirroring the teacher's `EventBusStats`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBusStats {
    /// Total events published across every job.
    pub total_published: u64,
    /// Subscribers currently registered across every job.
    pub active_subscribers: usize,
    /// Intermediate events coalesced away by a slow subscriber.
    pub dropped_events: u64,
}

/// A per-`job_id` broadcast bus with a bounded history ring and a
/// back-pressure strategy that never drops a terminal event.
pub struct InProcessBus {
    history_capacity: usize,
    jobs: RwLock<HashMap<String, JobChannel>>,
    stats: Arc<StatsInner>,
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl InProcessBus {
    /// Builds a bus whose per-job history ring holds at most `capacity`
    /// events.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self { history_capacity: capacity, jobs: RwLock::new(HashMap::new()), stats: Arc::new(StatsInner::default()) }
    }

    /// Snapshot of publish/subscriber/drop counters.
    pub async fn stats(&self) -> EventBusStats {
        let jobs = self.jobs.read().await;
        EventBusStats {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            active_subscribers: jobs.values().map(|c| c.subscribers.len()).sum(),
            dropped_events: self.stats.dropped_events.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl ProgressBus for InProcessBus {
    async fn publish(&self, event: ProgressEvent) {
        let job_id = event.job_id.as_str().to_string();
        let mut jobs = self.jobs.write().await;
        let channel = jobs.entry(job_id).or_insert_with(JobChannel::new);

        channel.history.push_back(event.clone());
        if channel.history.len() > self.history_capacity {
            channel.history.pop_front();
        }

        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        let is_terminal = event.stage.is_terminal();

        channel.subscribers.retain(|handle| Arc::strong_count(handle) > 1);
        for handle in &channel.subscribers {
            let mut slot = handle.slot.lock().expect("subscriber slot poisoned");
            if is_terminal {
                slot.terminal = Some(event.clone());
            } else {
                if slot.latest.is_some() {
                    self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
                }
                slot.latest = Some(event.clone());
            }
            drop(slot);
            handle.notify.notify_one();
        }
    }

    async fn history(&self, job_id: &str) -> Vec<ProgressEvent> {
        self.jobs.read().await.get(job_id).map(|c| c.history.iter().cloned().collect()).unwrap_or_default()
    }
}

impl InProcessBus {
    /// Registers a new subscriber for `job_id`, returning a handle with its
    /// own coalescing slot.
    pub async fn subscribe(&self, job_id: &str) -> Subscription {
        let mut jobs = self.jobs.write().await;
        let channel = jobs.entry(job_id.to_string()).or_insert_with(JobChannel::new);
        let handle = Arc::new(SubscriberHandle { slot: StdMutex::new(SlotState::default()), notify: Notify::new() });
        channel.subscribers.push(Arc::clone(&handle));
        Subscription { handle, done: false }
    }
}

/// A handle for receiving events for one job from an [`InProcessBus`].
pub struct Subscription {
    handle: Arc<SubscriberHandle>,
    done: bool,
}

impl Subscription {
    /// Waits for the next event, a terminal event, or a 30s idle keepalive.
    ///
    /// Returns `None` once a terminal event has already been delivered
    /// (spec §4.4 "on terminal status, return").
    pub async fn recv(&mut self) -> Option<BusEvent> {
        if self.done {
            return None;
        }
        loop {
            {
                let mut slot = self.handle.slot.lock().expect("subscriber slot poisoned");
                if let Some(terminal) = slot.terminal.take() {
                    drop(slot);
                    self.done = true;
                    return Some(BusEvent::Progress(terminal));
                }
                if let Some(latest) = slot.latest.take() {
                    drop(slot);
                    return Some(BusEvent::Progress(latest));
                }
            }
            tokio::select! {
                () = self.handle.notify.notified() => continue,
                () = tokio::time::sleep(KEEPALIVE_INTERVAL) => return Some(BusEvent::Keepalive),
            }
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Progress event bus (C4): per-`job_id` fan-out with a bounded history
//! ring, guaranteed terminal delivery under back-pressure, and an idle
//! keepalive.

/// The in-process broadcast-style implementation.
pub mod in_process;
/// The `op-queue` sub-stream-backed implementation.
pub mod stream_backed;

pub use in_process::{EventBusStats, InProcessBus, Subscription};
pub use stream_backed::{PollSubscription, StreamBackedBus};

use async_trait::async_trait;
use op_core::ProgressEvent;

/// One item a bus subscription yields: either a progress frame or an idle
/// keepalive sentinel (spec §4.4, §6 "SSE wire format").
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A progress or artifact frame.
    Progress(ProgressEvent),
    /// Emitted after 30s with no events for this job.
    Keepalive,
}

/// The operations both bus implementations share. Subscribing is deliberately
/// not part of this trait: the two implementations hand back different
/// subscription types (a live channel handle vs. a polling cursor), and a
/// process selects exactly one implementation at startup (spec §9 "resolve
/// at startup, inject downstream") rather than mixing them behind one
/// dynamic subscribe signature.
#[async_trait]
pub trait ProgressBus: Send + Sync {
    /// Publishes an event, appending it to the job's history and fanning it
    /// out to any live subscribers.
    async fn publish(&self, event: ProgressEvent);

    /// Returns the retained history for `job_id`, oldest first.
    async fn history(&self, job_id: &str) -> Vec<ProgressEvent>;
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Shared data model for the job orchestration and observability plane.
//!
//! This is the stable contract every other crate in the workspace builds on:
//! job records, queue envelopes, progress/artifact events, capability
//! schemas, interaction records, and the error taxonomy. Nothing here talks
//! to disk, a socket, or a clock beyond `chrono::Utc::now`.

/// Error taxonomy shared across the plane.
pub mod error;
/// Job identity, status, and record types.
pub mod job;
/// Progress and artifact event types (§3 Progress Event / Artifact Event).
pub mod progress;
/// Capability schema and parameter/toggle specs.
pub mod capability;
/// Interaction register entities (C6).
pub mod interaction;
/// Log record shapes shared by the service log and per-job JSONL.
pub mod log_record;

pub use capability::{CapabilitySchema, ParameterSpec, ParameterType, ToggleSpec};
pub use error::{OpError, OpErrorKind};
pub use interaction::{Interaction, InteractionStatus, InteractionStep, StepComponent};
pub use job::{JobId, JobRecord, JobStatus, JobType, ProgressSnapshot, QueueMessage};
pub use log_record::{JobLogRecord, LogLevel, LogRecord};
pub use progress::{ArtifactEvent, ArtifactType, GpuMetrics, ProgressEvent, TrainingStage};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serializes a value to canonical (stable-key, compact) JSON for hashing.
///
/// `serde_json::Value` backed by a `BTreeMap` already sorts object keys, so
/// round-tripping through `Value` before hashing is sufficient to make the
/// encoding canonical.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: serde_json::Value = serde_json::to_value(value)?;
    serde_json::to_string(&v)
}

/// Returns the lowercase hex-encoded SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

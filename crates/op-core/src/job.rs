// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job identity and record types (spec §3 "Job", "Queue Message").

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The two job families this plane dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Identity-model training run.
    Training,
    /// Image synthesis run.
    Generation,
}

impl JobType {
    /// The ID prefix used for jobs of this type (`train-` / `gen-`).
    pub fn prefix(self) -> &'static str {
        match self {
            JobType::Training => "train",
            JobType::Generation => "gen",
        }
    }

    /// The stream name this job type dispatches through (`jobs:training` /
    /// `jobs:generation`).
    pub fn stream_name(self) -> &'static str {
        match self {
            JobType::Training => "jobs:training",
            JobType::Generation => "jobs:generation",
        }
    }
}

/// An opaque job identifier: `<prefix>-<12 hex>`.
///
/// The source system carried both a short form (`train-<8 hex>`) and a long
/// form (`train-<12 hex>`); this plane standardizes on the long form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Mints a fresh ID for `job_type` from a random UUID v4.
    pub fn new(job_type: JobType) -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", job_type.prefix(), &hex[..12]))
    }

    /// Wraps an already-formatted ID without validating its shape.
    ///
    /// Used when rehydrating a job ID that was generated elsewhere (e.g. by
    /// an older job record on disk) and is trusted to be well-formed.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the job type implied by this ID's prefix, if recognized.
    pub fn job_type(&self) -> Option<JobType> {
        if self.0.starts_with("train-") {
            Some(JobType::Training)
        } else if self.0.starts_with("gen-") {
            Some(JobType::Generation)
        } else {
            None
        }
    }

    /// Returns the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal and non-terminal job states (spec §3 invariant: terminal states
/// are final once entered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not yet picked up by a worker.
    Queued,
    /// A worker is actively executing the job.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by a cancellation request.
    Cancelled,
}

impl JobStatus {
    /// `true` for `completed`, `failed`, `cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// The mutable progress snapshot carried on a [`JobRecord`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    /// Current step index, monotonic within a run.
    pub current_step: u64,
    /// Total steps the plugin reported at start, if known.
    pub total_steps: u64,
    /// Percent complete, `0.0..=100.0`, monotonic non-decreasing within a run.
    pub progress_pct: f64,
    /// Most recent training loss, if reported.
    pub loss: Option<f64>,
    /// Most recent learning rate, if reported.
    pub lr: Option<f64>,
    /// Estimated seconds remaining, if derivable.
    pub eta_seconds: Option<i64>,
    /// Steps per second, if derivable.
    pub iteration_speed: Option<f64>,
}

/// A durable record of one job.
///
/// Owned exclusively by the Job Store (`op-queue`); the executor holds a
/// transient reference and writes back through the store, never by direct
/// mutation after hand-off.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Opaque job identifier.
    pub id: JobId,
    /// Training or generation.
    pub job_type: JobType,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Immutable submission config, set once at creation.
    pub config: serde_json::Value,
    /// Mutable progress snapshot.
    pub progress: ProgressSnapshot,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// First transition out of `queued`, if it has happened.
    pub started_at: Option<DateTime<Utc>>,
    /// Transition into a terminal state, if it has happened.
    pub completed_at: Option<DateTime<Utc>>,
    /// Single output path, for jobs that produce exactly one artifact.
    pub output_path: Option<String>,
    /// Multiple output paths, for jobs that produce several.
    pub output_paths: Vec<String>,
    /// Human-readable error summary, set only on `failed`.
    pub error_message: Option<String>,
    /// The correlation ID under which this job was created.
    pub correlation_id: String,
}

impl JobRecord {
    /// Builds a freshly queued record, snapshotting `created_at` to now.
    pub fn new_queued(
        job_type: JobType,
        config: serde_json::Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(job_type),
            job_type,
            status: JobStatus::Queued,
            config,
            progress: ProgressSnapshot::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output_path: None,
            output_paths: Vec::new(),
            error_message: None,
            correlation_id: correlation_id.into(),
        }
    }
}

/// The envelope a stream stores for one queued job (spec §3 "Queue
/// Message").
///
/// Carries enough state that a fresh worker can execute without consulting
/// other stores, other than reading collaborator metadata from the job
/// store.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueMessage {
    /// Stream-assigned message ID (monotonic within the stream).
    pub id: String,
    /// Job type, selects which stream this travels on.
    pub job_type: JobType,
    /// Correlation ID carried from the originating request.
    pub correlation_id: String,
    /// Timestamp the message was appended to the stream.
    pub created_at: DateTime<Utc>,
    /// Opaque job-specific payload (the submission config plus the job ID).
    pub payload: serde_json::Value,
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Progress and artifact events (spec §3).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus, JobType};

/// The named phases a job passes through between `queued` and a terminal
/// state (spec §4.5 execution stage machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStage {
    /// Accepted, not yet claimed by a worker.
    Queued,
    /// Worker claimed the job and is preparing to run the plugin.
    Initializing,
    /// Building/validating the training dataset.
    PreparingDataset,
    /// Optional: generating captions for the dataset.
    Captioning,
    /// Actively training.
    Training,
    /// Optional: generating preview samples.
    Sampling,
    /// Writing final artifacts.
    Exporting,
    /// Reached terminal success.
    Completed,
    /// Reached terminal failure.
    Failed,
    /// Reached terminal cancellation.
    Cancelled,
}

impl TrainingStage {
    /// `true` for `completed`, `failed`, `cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TrainingStage::Completed | TrainingStage::Failed | TrainingStage::Cancelled
        )
    }
}

/// Host GPU metrics, refreshed no more than once every 5s by the executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GpuMetrics {
    /// Utilization, 0-100%.
    pub utilization: f64,
    /// Memory used, GB.
    pub memory_used: f64,
    /// Total memory, GB.
    pub memory_total: f64,
    /// Temperature, Celsius.
    pub temperature: f64,
    /// Power draw, Watts.
    pub power_watts: f64,
}

/// A typed progress frame emitted by the executor to the progress bus (C4).
///
/// Invariant: once a terminal `status` is published for a `job_id`, no
/// further events for that `job_id` are published by the same run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    /// The job this event describes.
    pub job_id: JobId,
    /// Correlation ID carried from the originating request, if known.
    pub correlation_id: Option<String>,
    /// Job-level status at the time of this event.
    pub status: JobStatus,
    /// Stage-machine position.
    pub stage: TrainingStage,
    /// Current step.
    pub step: u64,
    /// Total steps, if known.
    pub steps_total: u64,
    /// Percent complete.
    pub progress_pct: f64,
    /// Most recent loss, if reported.
    pub loss: Option<f64>,
    /// Most recent learning rate, if reported.
    pub lr: Option<f64>,
    /// Estimated seconds remaining, if derivable.
    pub eta_seconds: Option<i64>,
    /// Host GPU metrics snapshot, if available.
    pub gpu: Option<GpuMetrics>,
    /// Human-readable message for this event.
    pub message: String,
    /// Path of a newly produced sample, set at most once per path.
    pub sample_path: Option<String>,
    /// Path of a newly produced checkpoint.
    pub checkpoint_path: Option<String>,
    /// Error summary, set only on a terminal `failed` event.
    pub error: Option<String>,
    /// Error type/class name, set only on a terminal `failed` event.
    pub error_type: Option<String>,
    /// Full error stack trace, set only on a terminal `failed` event.
    pub error_stack: Option<String>,
    /// When this event was produced.
    pub timestamp: DateTime<Utc>,
}

/// The kind of on-disk product an [`ArtifactEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// A preview/sample image.
    Sample,
    /// An intermediate training checkpoint.
    Checkpoint,
    /// The final trained model.
    Model,
}

/// Emitted when a plugin reports an on-disk product (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactEvent {
    /// The job that produced this artifact.
    pub job_id: JobId,
    /// What kind of artifact this is.
    pub artifact_type: ArtifactType,
    /// On-disk path.
    pub path: String,
    /// The training step this artifact was produced at, if applicable.
    pub step: Option<u64>,
    /// When the artifact was reported.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary plugin-supplied metadata.
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_three_terminal_stages_report_terminal() {
        let terminal = [TrainingStage::Completed, TrainingStage::Failed, TrainingStage::Cancelled];
        let non_terminal = [
            TrainingStage::Queued,
            TrainingStage::Initializing,
            TrainingStage::PreparingDataset,
            TrainingStage::Captioning,
            TrainingStage::Training,
            TrainingStage::Sampling,
            TrainingStage::Exporting,
        ];
        for stage in terminal {
            assert!(stage.is_terminal(), "{stage:?} should be terminal");
        }
        for stage in non_terminal {
            assert!(!stage.is_terminal(), "{stage:?} should not be terminal");
        }
    }

    #[test]
    fn progress_event_serializes_stage_in_snake_case() {
        let event = ProgressEvent {
            job_id: JobId::new(JobType::Training),
            correlation_id: None,
            status: JobStatus::Running,
            stage: TrainingStage::PreparingDataset,
            step: 0,
            steps_total: 100,
            progress_pct: 0.0,
            loss: None,
            lr: None,
            eta_seconds: None,
            gpu: None,
            message: "preparing dataset".into(),
            sample_path: None,
            checkpoint_path: None,
            error: None,
            error_type: None,
            error_stack: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "preparing_dataset");
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plugin contract (spec §4.5 "Plugin contracts").
//!
//! Modeled on the teacher's `abp_backend_core::Backend` trait: a plugin owns
//! its own execution and streams progress back over an `mpsc::Sender`
//! rather than the spec's "`progress_cb` MAY be sync or async" — in Rust,
//! handing the plugin a channel sender serves both calling conventions
//! without the caller needing to know which one the plugin used.

use async_trait::async_trait;
use op_core::{CapabilitySchema, JobId, OpError};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// One update a plugin reports mid-run. Fields are independently optional;
/// the executor fills in anything a particular plugin doesn't report.
#[derive(Debug, Clone, Default)]
pub struct PluginProgress {
    /// Current step, if the plugin tracks one.
    pub step: Option<u64>,
    /// Total steps, if known (may be revised mid-run).
    pub steps_total: Option<u64>,
    /// Most recent loss.
    pub loss: Option<f64>,
    /// Most recent learning rate.
    pub lr: Option<f64>,
    /// Human-readable message for this update.
    pub message: Option<String>,
    /// Newly produced sample path, if any.
    pub sample_path: Option<String>,
    /// Newly produced checkpoint path, if any.
    pub checkpoint_path: Option<String>,
}

/// What a plugin run produced, success or failure (spec §4.5 "Completion").
#[derive(Debug, Clone)]
pub struct PluginOutcome {
    /// Whether the plugin considers the run successful.
    pub success: bool,
    /// Single primary output path, for training runs.
    pub output_path: Option<String>,
    /// Multiple output paths, for generation runs.
    pub output_paths: Vec<String>,
    /// Short error message, set when `success` is `false`.
    pub error_message: Option<String>,
    /// Plugin-reported error class/type name.
    pub error_type: Option<String>,
    /// Full stack trace, retained for the job log / debug bundle only.
    pub error_stack: Option<String>,
}

impl PluginOutcome {
    /// Builds a successful outcome with a single output path.
    pub fn success(output_path: impl Into<String>) -> Self {
        Self {
            success: true,
            output_path: Some(output_path.into()),
            output_paths: Vec::new(),
            error_message: None,
            error_type: None,
            error_stack: None,
        }
    }

    /// Builds a successful outcome with multiple output paths.
    pub fn success_many(output_paths: Vec<String>) -> Self {
        Self {
            success: true,
            output_path: None,
            output_paths,
            error_message: None,
            error_type: None,
            error_stack: None,
        }
    }

    /// Builds a failure outcome.
    pub fn failure(message: impl Into<String>, error_type: impl Into<String>, error_stack: impl Into<String>) -> Self {
        Self {
            success: false,
            output_path: None,
            output_paths: Vec::new(),
            error_message: Some(message.into()),
            error_type: Some(error_type.into()),
            error_stack: Some(error_stack.into()),
        }
    }
}

/// Everything a training plugin needs for one run.
#[derive(Debug, Clone)]
pub struct TrainingRunConfig {
    /// The job this run belongs to.
    pub job_id: JobId,
    /// The submitted, already-validated config.
    pub config: serde_json::Value,
    /// Directory of training images.
    pub images_dir: PathBuf,
    /// Where the trained artifact should be written.
    pub output_path: PathBuf,
    /// Trigger word baked into captions, if any.
    pub trigger_word: Option<String>,
}

/// Everything an image plugin needs for one run.
#[derive(Debug, Clone)]
pub struct GenerationRunConfig {
    /// The job this run belongs to.
    pub job_id: JobId,
    /// The submitted, already-validated config.
    pub config: serde_json::Value,
    /// Directory generated images should be written to.
    pub output_dir: PathBuf,
    /// Path to a LoRA to apply, if any.
    pub lora_path: Option<PathBuf>,
    /// How many images to produce.
    pub count: u32,
}

/// A training backend (spec §4.5 "Training plugin").
#[async_trait]
pub trait TrainingPlugin: Send + Sync {
    /// Plugin name, as surfaced in job logs and error messages.
    fn name(&self) -> &str;

    /// Training methods this plugin implements (e.g. `lora`, `dreambooth`).
    fn supported_methods(&self) -> Vec<String>;

    /// The capability schema this plugin advertises (spec §4.3 "Capability
    /// Schema"), used by the submission-path validator.
    fn get_capabilities(&self) -> CapabilitySchema;

    /// Validates `config` against [`get_capabilities`](Self::get_capabilities).
    /// Plugins needing additional checks beyond the generic field validator
    /// may override this.
    fn validate_config(&self, config: &serde_json::Value) -> Result<(), OpError> {
        op_capability::validate_or_reject(&self.get_capabilities(), config)
    }

    /// Runs training, streaming [`PluginProgress`] over `progress_tx` until
    /// the run finishes.
    async fn train(&self, run: TrainingRunConfig, progress_tx: mpsc::Sender<PluginProgress>) -> PluginOutcome;

    /// Requests cooperative cancellation of the in-flight run, if any.
    async fn cancel(&self);
}

/// An image-generation backend (spec §4.5 "Image plugin").
#[async_trait]
pub trait ImagePlugin: Send + Sync {
    /// Plugin name, as surfaced in job logs and error messages.
    fn name(&self) -> &str;

    /// The capability schema this plugin advertises.
    fn get_capabilities(&self) -> CapabilitySchema;

    /// Checks whether the backend is reachable before a job is dispatched
    /// to it (spec §4.5 submission path step 3).
    async fn check_health(&self) -> Result<(), String>;

    /// Validates `config` against [`get_capabilities`](Self::get_capabilities).
    fn validate_config(&self, config: &serde_json::Value) -> Result<(), OpError> {
        op_capability::validate_or_reject(&self.get_capabilities(), config)
    }

    /// Runs generation, streaming [`PluginProgress`] over `progress_tx`
    /// until the run finishes.
    async fn generate(&self, run: GenerationRunConfig, progress_tx: mpsc::Sender<PluginProgress>) -> PluginOutcome;

    /// Requests cooperative cancellation of the in-flight run, if any.
    async fn cancel(&self);

    /// Named workflow variants this plugin exposes.
    fn list_workflows(&self) -> Vec<String>;

    /// Detail for one named workflow, if it exists.
    fn get_workflow_info(&self, name: &str) -> Option<serde_json::Value>;
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic mock training plugin, grounded on
//! `original_source/packages/plugins/training/src/mock_plugin.py`: no real
//! GPU work, synthetic loss decay, placeholder sample/checkpoint files at
//! the same cadence the original used.

use async_trait::async_trait;
use op_capability::validate_or_reject;
use op_core::{CapabilitySchema, OpError, ParameterSpec, ParameterType, ToggleSpec};
use op_executor::{PluginOutcome, PluginProgress, TrainingPlugin, TrainingRunConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Per-step delay. Far shorter than the 50ms the original mock used, since
/// fast-test mode exists to make integration tests fast, not merely
/// GPU-free.
const STEP_DELAY: Duration = Duration::from_millis(2);

/// A deterministic stand-in for a real LoRA training backend.
#[derive(Debug, Clone, Default)]
pub struct MockTrainingPlugin {
    cancelled: Arc<AtomicBool>,
}

impl MockTrainingPlugin {
    /// Builds a fresh plugin instance.
    pub fn new() -> Self {
        Self::default()
    }
}

fn wired_int(min: f64, max: f64, default: i64) -> ParameterSpec {
    ParameterSpec {
        param_type: ParameterType::Int,
        min: Some(min),
        max: Some(max),
        step: None,
        options: None,
        default: Some(default.into()),
        wired: true,
        reason: None,
    }
}

fn wired_enum(options: &[&str], default: &str) -> ParameterSpec {
    ParameterSpec {
        param_type: ParameterType::Enum,
        min: None,
        max: None,
        step: None,
        options: Some(options.iter().map(|s| s.to_string()).collect()),
        default: Some(default.into()),
        wired: true,
        reason: None,
    }
}

fn unwired_int(min: f64, max: f64, default: i64, reason: &str) -> ParameterSpec {
    ParameterSpec { wired: false, reason: Some(reason.to_string()), ..wired_int(min, max, default) }
}

fn capability_schema() -> CapabilitySchema {
    let mut parameters = BTreeMap::new();
    parameters.insert(
        "steps".to_string(),
        ParameterSpec {
            param_type: ParameterType::Int,
            min: Some(100.0),
            max: Some(10_000.0),
            step: None,
            options: None,
            default: Some(1000.into()),
            wired: true,
            reason: None,
        },
    );
    parameters.insert(
        "learning_rate".to_string(),
        ParameterSpec {
            param_type: ParameterType::Float,
            min: Some(1e-6),
            max: Some(0.01),
            step: Some(1e-6),
            options: None,
            default: Some(serde_json::json!(0.0001)),
            wired: true,
            reason: None,
        },
    );
    parameters.insert("lora_rank".to_string(), wired_enum(&["4", "8", "16", "32", "64", "128"], "16"));
    parameters.insert("resolution".to_string(), wired_enum(&["512", "768", "1024"], "1024"));
    parameters.insert("batch_size".to_string(), wired_enum(&["1", "2", "4"], "1"));
    parameters.insert("optimizer".to_string(), wired_enum(&["adamw8bit", "adamw", "prodigy"], "adamw8bit"));
    parameters.insert(
        "scheduler".to_string(),
        wired_enum(&["constant", "cosine", "cosine_with_restarts", "linear"], "cosine"),
    );
    parameters.insert("precision".to_string(), wired_enum(&["bf16", "fp16", "fp32"], "bf16"));
    parameters.insert(
        "gradient_accumulation".to_string(),
        unwired_int(1.0, 8.0, 1, "Not implemented in mock plugin"),
    );
    parameters.insert("network_alpha".to_string(), unwired_int(1.0, 128.0, 16, "Planned for Phase 2"));

    CapabilitySchema { method: "lora".to_string(), variants: vec!["mock".to_string()], toggles: BTreeMap::new(), parameters }
}

fn sample_interval_for(total_steps: u64) -> u64 {
    let base = (total_steps / 10).max(1);
    if total_steps < 20 {
        (total_steps / 3).max(1)
    } else {
        base
    }
}

fn write_placeholder_file(path: &Path, lines: &[String]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, lines.join("\n"))
}

#[async_trait]
impl TrainingPlugin for MockTrainingPlugin {
    fn name(&self) -> &str {
        "mock"
    }

    fn supported_methods(&self) -> Vec<String> {
        vec!["lora".to_string()]
    }

    fn get_capabilities(&self) -> CapabilitySchema {
        capability_schema()
    }

    async fn train(&self, run: TrainingRunConfig, progress_tx: mpsc::Sender<PluginProgress>) -> PluginOutcome {
        if let Err(err) = validate_or_reject(&self.get_capabilities(), &run.config) {
            return outcome_from_validation(err);
        }

        self.cancelled.store(false, Ordering::SeqCst);
        let total_steps = run.config.get("steps").and_then(|v| v.as_u64()).unwrap_or(1000).max(1);
        let learning_rate = run.config.get("learning_rate").and_then(|v| v.as_f64()).unwrap_or(0.0001);
        let trigger_word = run.trigger_word.clone().unwrap_or_else(|| "token".to_string());
        let sample_interval = sample_interval_for(total_steps);
        let parent = run.output_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let samples_dir = parent.join("samples");
        let checkpoints_dir = parent.join("checkpoints");

        info!(job_id = %run.job_id, total_steps, sample_interval, "mock training started");

        let mut loss = 0.5_f64;
        let mut last_sample_path = None;

        for step in 1..=total_steps {
            if self.cancelled.load(Ordering::SeqCst) {
                info!(job_id = %run.job_id, step, "mock training cancelled");
                return PluginOutcome::failure("Training cancelled by user", "Cancelled", "");
            }

            tokio::time::sleep(STEP_DELAY).await;

            let noise = ((step % 7) as f64 - 3.0) * 0.0015;
            loss = (loss * 0.998 + noise).max(0.01);

            let mut sample_path = None;
            if step % sample_interval == 0 || step == total_steps {
                let path = samples_dir.join(format!("step_{step:05}.png"));
                let lines = vec![
                    "MOCK_SAMPLE_PLACEHOLDER".to_string(),
                    format!("step={step}/{total_steps}"),
                    format!("loss={loss:.4}"),
                    format!("trigger={trigger_word}"),
                ];
                if write_placeholder_file(&path, &lines).is_ok() {
                    sample_path = Some(path.display().to_string());
                    last_sample_path = sample_path.clone();
                }
            }

            let checkpoint_path = if step == total_steps / 2 || step == total_steps {
                let path = checkpoints_dir.join(format!("step_{step:05}.safetensors"));
                write_placeholder_file(&path, &[format!("MOCK_CHECKPOINT step={step}")]).ok();
                Some(path.display().to_string())
            } else {
                None
            };

            let _ = progress_tx
                .send(PluginProgress {
                    step: Some(step),
                    steps_total: Some(total_steps),
                    loss: Some(loss),
                    lr: Some(learning_rate),
                    message: Some(format!("Training step {step}/{total_steps}")),
                    sample_path,
                    checkpoint_path,
                })
                .await;
        }

        if let Err(e) = write_placeholder_file(
            &run.output_path,
            &[
                "MOCK_LORA_MODEL_PLACEHOLDER".to_string(),
                format!("trigger_word={trigger_word}"),
                format!("steps={total_steps}"),
                format!("final_loss={loss:.4}"),
            ],
        ) {
            return PluginOutcome::failure(format!("failed to write output: {e}"), "IoError", "");
        }

        info!(job_id = %run.job_id, final_loss = loss, last_sample = ?last_sample_path, "mock training completed");
        PluginOutcome::success(run.output_path.display().to_string())
    }

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

fn outcome_from_validation(err: OpError) -> PluginOutcome {
    PluginOutcome::failure(err.kind.detail(), "ValidationRejected", "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::{JobId, JobType};
    use tempfile::tempdir;

    fn run_config(dir: &std::path::Path, steps: u64) -> TrainingRunConfig {
        TrainingRunConfig {
            job_id: JobId::new(JobType::Training),
            config: serde_json::json!({ "steps": steps, "learning_rate": 0.0002 }),
            images_dir: dir.join("images"),
            output_path: dir.join("out/model.safetensors"),
            trigger_word: Some("ohwx".to_string()),
        }
    }

    #[tokio::test]
    async fn completes_and_writes_output_and_samples() {
        let dir = tempdir().unwrap();
        let plugin = MockTrainingPlugin::new();
        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move { plugin.train(run_config(dir.path(), 12), tx).await });

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        let outcome = handle.await.unwrap();

        assert!(outcome.success);
        assert_eq!(updates.len(), 12);
        assert!(updates.iter().any(|u| u.sample_path.is_some()));
        assert!(std::path::Path::new(outcome.output_path.as_deref().unwrap()).exists());
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_and_reports_failure() {
        let dir = tempdir().unwrap();
        let plugin = Arc::new(MockTrainingPlugin::new());
        let plugin_clone = Arc::clone(&plugin);
        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move { plugin_clone.train(run_config(dir.path(), 10_000), tx).await });

        // Let a few steps run, then cancel.
        let _ = rx.recv().await;
        plugin.cancel().await;
        while rx.recv().await.is_some() {}

        let outcome = handle.await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("Training cancelled by user"));
    }

    #[test]
    fn sample_interval_guarantees_at_least_two_samples_on_short_runs() {
        assert_eq!(sample_interval_for(10), 3);
        assert_eq!(sample_interval_for(1000), 100);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_step_runs() {
        let dir = tempdir().unwrap();
        let plugin = MockTrainingPlugin::new();
        let mut config = run_config(dir.path(), 10);
        config.config = serde_json::json!({ "steps": 10, "gradient_accumulation": 4 });
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = plugin.train(config, tx).await;
        assert!(!outcome.success);
        assert!(rx.recv().await.is_none());
    }
}

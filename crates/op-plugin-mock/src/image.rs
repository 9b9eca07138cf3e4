// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic mock image-generation plugin, grounded on
//! `original_source/packages/plugins/image/src/mock_plugin.py`: placeholder
//! SVGs instead of real diffusion output.

use async_trait::async_trait;
use op_capability::validate_or_reject;
use op_core::{CapabilitySchema, OpError, ParameterSpec, ParameterType, ToggleSpec};
use op_executor::{GenerationRunConfig, ImagePlugin, PluginOutcome, PluginProgress};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

const STEP_DELAY: Duration = Duration::from_millis(1);

const PLACEHOLDER_SVG: &str = r#"<svg width="{width}" height="{height}" xmlns="http://www.w3.org/2000/svg">
  <rect width="100%" height="100%" fill="#1a1a2e"/>
  <text x="50%" y="50%" font-family="sans-serif" font-size="24" fill="#e94560" text-anchor="middle">[Mock Image] {width}x{height} seed {seed}</text>
</svg>"#;

/// A deterministic stand-in for a real diffusion backend.
#[derive(Debug, Clone, Default)]
pub struct MockImagePlugin {
    cancelled: Arc<AtomicBool>,
}

impl MockImagePlugin {
    /// Builds a fresh plugin instance.
    pub fn new() -> Self {
        Self::default()
    }
}

fn toggle(supported: bool) -> ToggleSpec {
    ToggleSpec { supported, reason: None }
}

fn capability_schema() -> CapabilitySchema {
    let mut toggles = BTreeMap::new();
    toggles.insert("use_upscale".to_string(), toggle(true));
    toggles.insert("use_facedetailer".to_string(), toggle(true));
    toggles.insert("use_ipadapter".to_string(), toggle(true));
    toggles.insert("use_controlnet".to_string(), toggle(true));

    let mut parameters = BTreeMap::new();
    parameters.insert(
        "width".to_string(),
        ParameterSpec {
            param_type: ParameterType::Int,
            min: Some(512.0),
            max: Some(2048.0),
            step: Some(64.0),
            options: None,
            default: Some(1024.into()),
            wired: true,
            reason: None,
        },
    );
    parameters.insert(
        "height".to_string(),
        ParameterSpec {
            param_type: ParameterType::Int,
            min: Some(512.0),
            max: Some(2048.0),
            step: Some(64.0),
            options: None,
            default: Some(1024.into()),
            wired: true,
            reason: None,
        },
    );
    parameters.insert(
        "steps".to_string(),
        ParameterSpec {
            param_type: ParameterType::Int,
            min: Some(1.0),
            max: Some(100.0),
            step: None,
            options: None,
            default: Some(20.into()),
            wired: true,
            reason: None,
        },
    );
    parameters.insert(
        "guidance_scale".to_string(),
        ParameterSpec {
            param_type: ParameterType::Float,
            min: Some(1.0),
            max: Some(20.0),
            step: Some(0.5),
            options: None,
            default: Some(serde_json::json!(3.5)),
            wired: true,
            reason: None,
        },
    );
    parameters.insert(
        "seed".to_string(),
        ParameterSpec {
            param_type: ParameterType::Int,
            min: Some(0.0),
            max: Some(2_147_483_647.0),
            step: None,
            options: None,
            default: Some(0.into()),
            wired: true,
            reason: None,
        },
    );

    CapabilitySchema { method: "diffusion".to_string(), variants: vec!["flux-dev".to_string(), "flux-schnell".to_string()], toggles, parameters }
}

#[async_trait]
impl ImagePlugin for MockImagePlugin {
    fn name(&self) -> &str {
        "mock"
    }

    fn get_capabilities(&self) -> CapabilitySchema {
        capability_schema()
    }

    async fn check_health(&self) -> Result<(), String> {
        Ok(())
    }

    async fn generate(&self, run: GenerationRunConfig, progress_tx: mpsc::Sender<PluginProgress>) -> PluginOutcome {
        if let Err(err) = validate_or_reject(&self.get_capabilities(), &run.config) {
            return outcome_from_validation(err);
        }

        self.cancelled.store(false, Ordering::SeqCst);
        let width = run.config.get("width").and_then(|v| v.as_u64()).unwrap_or(1024);
        let height = run.config.get("height").and_then(|v| v.as_u64()).unwrap_or(1024);
        let steps_per_image = run.config.get("steps").and_then(|v| v.as_u64()).unwrap_or(20).max(1);
        let configured_seed = run.config.get("seed").and_then(|v| v.as_i64());
        let total_steps = steps_per_image * run.count.max(1) as u64;

        if let Err(e) = tokio::fs::create_dir_all(&run.output_dir).await {
            return PluginOutcome::failure(format!("failed to create output dir: {e}"), "IoError", "");
        }

        info!(job_id = %run.job_id, count = run.count, total_steps, "mock generation started");

        let mut output_paths = Vec::new();
        for image_index in 0..run.count {
            if self.cancelled.load(Ordering::SeqCst) {
                return PluginOutcome { success: false, output_path: None, output_paths, error_message: Some("Generation cancelled by user".to_string()), error_type: Some("Cancelled".to_string()), error_stack: None };
            }

            for local_step in 0..steps_per_image {
                if self.cancelled.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(STEP_DELAY).await;
                let current = image_index as u64 * steps_per_image + local_step + 1;
                let _ = progress_tx
                    .send(PluginProgress {
                        step: Some(current),
                        steps_total: Some(total_steps),
                        loss: None,
                        lr: None,
                        message: Some(format!("Generating image {}/{}, step {}/{steps_per_image}", image_index + 1, run.count)),
                        sample_path: None,
                        checkpoint_path: None,
                    })
                    .await;
            }

            let seed = configured_seed.unwrap_or(42 + image_index as i64);
            let svg = PLACEHOLDER_SVG.replace("{width}", &width.to_string()).replace("{height}", &height.to_string()).replace("{seed}", &seed.to_string());
            let path = run.output_dir.join(format!("generated_{}_seed{seed}.svg", image_index + 1));
            if let Err(e) = tokio::fs::write(&path, svg).await {
                return PluginOutcome::failure(format!("failed to write image: {e}"), "IoError", "");
            }
            output_paths.push(path.display().to_string());
        }

        PluginOutcome::success_many(output_paths)
    }

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn list_workflows(&self) -> Vec<String> {
        vec!["flux-dev-lora".to_string(), "sdxl-lora".to_string(), "flux-schnell".to_string()]
    }

    fn get_workflow_info(&self, name: &str) -> Option<serde_json::Value> {
        let info = match name {
            "flux-dev-lora" => serde_json::json!({ "name": "flux-dev-lora", "description": "FLUX.1-dev with LoRA support", "model": "FLUX.1-dev", "supports_lora": true }),
            "sdxl-lora" => serde_json::json!({ "name": "sdxl-lora", "description": "SDXL with LoRA support", "model": "SDXL 1.0", "supports_lora": true }),
            "flux-schnell" => serde_json::json!({ "name": "flux-schnell", "description": "FLUX.1-schnell for fast generation", "model": "FLUX.1-schnell", "supports_lora": false }),
            _ => return None,
        };
        Some(info)
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

    fn run_config(dir: &std::path::Path, count: u32) -> GenerationRunConfig {
        GenerationRunConfig {
            job_id: JobId::new(JobType::Generation),
            config: serde_json::json!({ "width": 512, "height": 512, "steps": 4, "seed": 7 }),
            output_dir: dir.to_path_buf(),
            lora_path: None,
            count,
        }
    }

    #[tokio::test]
    async fn generates_one_file_per_requested_image() {
        let dir = tempdir().unwrap();
        let plugin = MockImagePlugin::new();
        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move { plugin.generate(run_config(dir.path(), 3), tx).await });
        while rx.recv().await.is_some() {}
        let outcome = handle.await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output_paths.len(), 3);
        for path in &outcome.output_paths {
            assert!(std::path::Path::new(path).exists());
        }
    }

    #[tokio::test]
    async fn workflow_lookup_matches_listed_names() {
        let plugin = MockImagePlugin::new();
        for name in plugin.list_workflows() {
            assert!(plugin.get_workflow_info(&name).is_some());
        }
        assert!(plugin.get_workflow_info("nonexistent").is_none());
    }

    #[tokio::test]
    async fn health_check_always_succeeds() {
        assert!(MockImagePlugin::new().check_health().await.is_ok());
    }
}

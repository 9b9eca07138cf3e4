// SPDX-License-Identifier: MIT OR Apache-2.0
//! The executor loop: stage transitions, progress throttling/publishing,
//! and completion/failure/cancellation handling (spec §4.5).
//!
//! The two-stage channel handoff and the `tokio::select!` race between
//! "plugin reported progress" and "plugin task finished" are adapted
//! directly from the teacher's `Runtime::run_streaming`: a first channel
//! carries updates out of the spawned plugin task, a `select!` loop drains
//! it while also watching the task's `JoinHandle`, and a post-select drain
//! plus fallback `.await` picks up anything sent in the narrow window
//! between the channel closing and the task actually returning.

use crate::cancel::CancellableRun;
use crate::plugin::{GenerationRunConfig, ImagePlugin, PluginOutcome, PluginProgress, TrainingPlugin, TrainingRunConfig};
use crate::stage::validate_transition;
use crate::throttle::{ProgressThrottler, DEFAULT_MIN_EMIT_INTERVAL};
use chrono::Utc;
use op_bus::ProgressBus;
use op_core::{GpuMetrics, JobRecord, JobStatus, ProgressEvent, TrainingStage};
use op_log::{JobLogger, TrainingJobLogger};
use op_queue::QueuePlane;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long the executor waits for a plugin to stop cooperatively after
/// `cancel()` before it force-terminates the task (spec §4.5 "waits briefly
/// and then force-terminates any child process").
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Drives plugin execution for both job families.
pub struct Executor {
    plane: Arc<QueuePlane>,
    bus: Arc<dyn ProgressBus>,
    volume_root: PathBuf,
}

/// Per-run tracking the select loop needs: current stage, throttler state,
/// and which artifact paths have already been reported.
struct RunTracker {
    stage: TrainingStage,
    throttler: ProgressThrottler,
    seen_samples: HashSet<String>,
    seen_checkpoints: HashSet<String>,
    start: Instant,
}

impl RunTracker {
    fn new(stage: TrainingStage) -> Self {
        Self {
            stage,
            throttler: ProgressThrottler::new(DEFAULT_MIN_EMIT_INTERVAL),
            seen_samples: HashSet::new(),
            seen_checkpoints: HashSet::new(),
            start: Instant::now(),
        }
    }
}

impl Executor {
    /// Builds an executor rooted at `volume_root`, wired to `plane` and `bus`.
    pub fn new(plane: Arc<QueuePlane>, bus: Arc<dyn ProgressBus>, volume_root: PathBuf) -> Self {
        Self { plane, bus, volume_root }
    }

    /// Runs one training job end to end, returning the final record.
    pub async fn run_training(
        &self,
        plugin: Arc<dyn TrainingPlugin>,
        mut record: JobRecord,
        run: TrainingRunConfig,
        cancel: CancellableRun,
    ) -> JobRecord {
        let job_logger = JobLogger::new(&self.volume_root, record.id.as_str(), "worker");
        let training_logger = TrainingJobLogger::new(job_logger.clone());

        record.status = JobStatus::Running;
        record.started_at = Some(Utc::now());
        let mut tracker = RunTracker::new(TrainingStage::Queued);

        self.enter_stage(&mut record, &mut tracker, TrainingStage::Initializing, "worker claimed job", &job_logger).await;
        job_logger.info("submitted config".to_string(), Some("job.config"), Some(serde_json::json!({ "config": record.config }))).await;
        self.enter_stage(&mut record, &mut tracker, TrainingStage::PreparingDataset, "preparing training dataset", &job_logger).await;
        self.enter_stage(&mut record, &mut tracker, TrainingStage::Training, "training started", &job_logger).await;
        training_logger.start(record.progress.total_steps).await;

        let (progress_tx, progress_rx) = mpsc::channel::<PluginProgress>(256);
        let plugin_for_task = plugin.clone();
        let run_for_task = run.clone();
        let handle = tokio::spawn(async move { plugin_for_task.train(run_for_task, progress_tx).await });

        let (outcome, cancelled) = self
            .drive(&mut record, &mut tracker, progress_rx, handle, &cancel, &training_logger, || {
                let plugin = plugin.clone();
                async move { plugin.cancel().await }
            })
            .await;

        if cancelled {
            self.finish_cancelled(&mut record, &mut tracker, &cancel, &job_logger).await;
        } else {
            self.finish_training(&mut record, &mut tracker, outcome, &training_logger, &job_logger).await;
        }
        record
    }

    /// Runs one generation job end to end, returning the final record.
    pub async fn run_generation(
        &self,
        plugin: Arc<dyn ImagePlugin>,
        mut record: JobRecord,
        run: GenerationRunConfig,
        cancel: CancellableRun,
    ) -> JobRecord {
        let job_logger = JobLogger::new(&self.volume_root, record.id.as_str(), "worker");
        let training_logger = TrainingJobLogger::new(job_logger.clone());

        record.status = JobStatus::Running;
        record.started_at = Some(Utc::now());
        let mut tracker = RunTracker::new(TrainingStage::Queued);

        self.enter_stage(&mut record, &mut tracker, TrainingStage::Initializing, "worker claimed job", &job_logger).await;
        job_logger.info("submitted config".to_string(), Some("job.config"), Some(serde_json::json!({ "config": record.config }))).await;
        self.enter_stage(&mut record, &mut tracker, TrainingStage::Training, "generation started", &job_logger).await;

        let (progress_tx, progress_rx) = mpsc::channel::<PluginProgress>(64);
        let plugin_for_task = plugin.clone();
        let run_for_task = run.clone();
        let handle = tokio::spawn(async move { plugin_for_task.generate(run_for_task, progress_tx).await });

        let (outcome, cancelled) = self
            .drive(&mut record, &mut tracker, progress_rx, handle, &cancel, &training_logger, || {
                let plugin = plugin.clone();
                async move { plugin.cancel().await }
            })
            .await;

        if cancelled {
            self.finish_cancelled(&mut record, &mut tracker, &cancel, &job_logger).await;
        } else {
            self.finish_training(&mut record, &mut tracker, outcome, &training_logger, &job_logger).await;
        }
        record
    }

    /// The select loop shared by training and generation runs.
    #[allow(clippy::too_many_arguments)]
    async fn drive<F, Fut>(
        &self,
        record: &mut JobRecord,
        tracker: &mut RunTracker,
        mut progress_rx: mpsc::Receiver<PluginProgress>,
        mut handle: JoinHandle<PluginOutcome>,
        cancel: &CancellableRun,
        training_logger: &TrainingJobLogger,
        request_plugin_cancel: F,
    ) -> (PluginOutcome, bool)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let cancel_token = cancel.token();
        let mut cancel_requested = false;
        let mut outcome = None;

        loop {
            tokio::select! {
                update = progress_rx.recv() => {
                    match update {
                        Some(p) => self.apply_progress(record, tracker, p, training_logger).await,
                        None => break,
                    }
                }
                res = &mut handle => {
                    outcome = Some(resolve_outcome(res));
                    break;
                }
                () = cancel_token.cancelled(), if !cancel_requested => {
                    cancel_requested = true;
                    request_plugin_cancel().await;
                    break;
                }
            }
        }

        while let Ok(update) = progress_rx.try_recv() {
            self.apply_progress(record, tracker, update, training_logger).await;
        }

        let outcome = match outcome {
            Some(outcome) => outcome,
            None if cancel_requested => match tokio::time::timeout(CANCEL_GRACE_PERIOD, handle).await {
                Ok(res) => resolve_outcome(res),
                Err(_) => PluginOutcome::failure(
                    "plugin did not stop within the cancellation grace period",
                    "CancelTimeout",
                    "",
                ),
            },
            None => resolve_outcome(handle.await),
        };

        (outcome, cancel_requested && cancel.is_cancelled())
    }

    async fn enter_stage(
        &self,
        record: &mut JobRecord,
        tracker: &mut RunTracker,
        to: TrainingStage,
        message: &str,
        job_logger: &JobLogger,
    ) {
        if let Err(e) = validate_transition(tracker.stage, to) {
            tracing::error!(job_id = %record.id, ?e, "illegal stage transition attempted");
            return;
        }
        tracker.stage = to;

        self.plane.jobs.save(record.clone()).await.ok();

        let event_name = format!("stage.{}", stage_name(to));
        job_logger.info(message.to_string(), Some(event_name.as_str()), None).await;

        let event = self.build_event(record, tracker, message.to_string(), None, None, None);
        self.bus.publish(event).await;
    }

    async fn apply_progress(
        &self,
        record: &mut JobRecord,
        tracker: &mut RunTracker,
        update: PluginProgress,
        training_logger: &TrainingJobLogger,
    ) {
        let step = update.step.unwrap_or(record.progress.current_step);
        let total = update.steps_total.unwrap_or(record.progress.total_steps).max(1);

        let Some(derived) = tracker.throttler.poll(step, total, false, Instant::now()) else {
            return;
        };

        record.progress.current_step = step;
        record.progress.total_steps = total;
        record.progress.progress_pct = (step as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
        record.progress.loss = update.loss.or(record.progress.loss);
        record.progress.lr = update.lr.or(record.progress.lr);
        record.progress.iteration_speed = derived.iteration_speed;
        record.progress.eta_seconds = derived.eta_seconds;

        self.plane.jobs.save(record.clone()).await.ok();

        training_logger
            .step(step, total, record.progress.progress_pct, record.progress.loss, record.progress.lr)
            .await;

        if let Some(sample) = &update.sample_path {
            if tracker.seen_samples.insert(sample.clone()) {
                training_logger.sample_generated(sample, Some(step)).await;
            }
        }
        if let Some(checkpoint) = &update.checkpoint_path {
            if tracker.seen_checkpoints.insert(checkpoint.clone()) {
                training_logger.checkpoint_saved(checkpoint, Some(step)).await;
            }
        }

        let message = update.message.unwrap_or_else(|| format!("step {step}/{total}"));
        let event =
            self.build_event(record, tracker, message, update.sample_path, update.checkpoint_path, None);
        self.bus.publish(event).await;
    }

    async fn finish_training(
        &self,
        record: &mut JobRecord,
        tracker: &mut RunTracker,
        outcome: PluginOutcome,
        training_logger: &TrainingJobLogger,
        job_logger: &JobLogger,
    ) {
        if outcome.success {
            self.enter_stage(record, tracker, TrainingStage::Exporting, "writing final artifacts", job_logger).await;

            record.status = JobStatus::Completed;
            record.completed_at = Some(Utc::now());
            record.progress.progress_pct = 100.0;
            record.output_path = outcome.output_path.clone();
            record.output_paths = outcome.output_paths.clone();

            if let Some(path) = outcome.output_path.as_deref() {
                self.write_training_sidecar(record, path, tracker.start.elapsed()).await;
            }
            self.update_collaborator_artifact(record).await;

            self.plane.jobs.save(record.clone()).await.ok();
            tracker.stage = TrainingStage::Completed;

            training_logger
                .complete(
                    outcome.output_path.as_deref().unwrap_or(""),
                    record.progress.total_steps,
                    record.progress.loss,
                )
                .await;

            let event = self.build_event(record, tracker, "job completed".into(), None, None, None);
            self.bus.publish(event).await;
        } else {
            tracker.stage = TrainingStage::Failed;
            record.status = JobStatus::Failed;
            record.completed_at = Some(Utc::now());
            record.error_message = outcome.error_message.clone();

            self.plane.jobs.save(record.clone()).await.ok();

            let message = outcome.error_message.clone().unwrap_or_else(|| "plugin failed".into());
            training_logger
                .fail(
                    &message,
                    outcome.error_type.as_deref().unwrap_or("PluginError"),
                    outcome.error_stack.as_deref().unwrap_or(""),
                )
                .await;

            let event = self.build_event(
                record,
                tracker,
                message,
                None,
                None,
                Some((outcome.error_message, outcome.error_type, outcome.error_stack)),
            );
            self.bus.publish(event).await;
        }
    }

    async fn finish_cancelled(
        &self,
        record: &mut JobRecord,
        tracker: &mut RunTracker,
        cancel: &CancellableRun,
        job_logger: &JobLogger,
    ) {
        tracker.stage = TrainingStage::Cancelled;
        record.status = JobStatus::Cancelled;
        record.completed_at = Some(Utc::now());
        let reason = cancel.reason().map(|r| r.description().to_string()).unwrap_or_else(|| "cancelled".into());
        record.error_message = Some(reason.clone());

        self.plane.jobs.save(record.clone()).await.ok();
        job_logger.info(reason.clone(), Some("job.cancelled"), None).await;

        let event = self.build_event(record, tracker, reason, None, None, None);
        self.bus.publish(event).await;
    }

    async fn write_training_sidecar(&self, record: &JobRecord, output_path: &str, elapsed: Duration) {
        let sidecar = serde_json::json!({
            "job_id": record.id.as_str(),
            "config": record.config,
            "final_loss": record.progress.loss,
            "total_steps": record.progress.total_steps,
            "training_seconds": elapsed.as_secs_f64(),
            "sample_count": 0,
            "completed_at": Utc::now(),
        });
        let path = PathBuf::from(output_path)
            .parent()
            .map(|p| p.join("training_config.json"))
            .unwrap_or_else(|| PathBuf::from("training_config.json"));
        if let Ok(bytes) = serde_json::to_vec_pretty(&sidecar) {
            if let Err(e) = tokio::fs::write(&path, bytes).await {
                tracing::warn!(job_id = %record.id, error = %e, "failed to write training sidecar");
            }
        }
    }

    /// Updates the character/collaborator record referenced by
    /// `config.character_id`, if any, with the resulting output path
    /// (spec §4.5 "update the owning collaborator record... last writer
    /// wins").
    async fn update_collaborator_artifact(&self, record: &JobRecord) {
        let Some(collaborator_id) = record.config.get("character_id").and_then(|v| v.as_str()) else {
            return;
        };
        let Ok(Some(mut collaborator)) = self.plane.collaborators.get(collaborator_id).await else {
            return;
        };
        if let Some(obj) = collaborator.as_object_mut() {
            if let Some(path) = record.output_path.clone() {
                obj.insert("lora_path".into(), serde_json::Value::String(path));
            }
        }
        self.plane.collaborators.put(collaborator_id, collaborator).await.ok();
    }

    fn build_event(
        &self,
        record: &JobRecord,
        tracker: &RunTracker,
        message: String,
        sample_path: Option<String>,
        checkpoint_path: Option<String>,
        error: Option<(Option<String>, Option<String>, Option<String>)>,
    ) -> ProgressEvent {
        let (error, error_type, error_stack) = error.unwrap_or((None, None, None));
        ProgressEvent {
            job_id: record.id.clone(),
            correlation_id: Some(record.correlation_id.clone()),
            status: record.status,
            stage: tracker.stage,
            step: record.progress.current_step,
            steps_total: record.progress.total_steps,
            progress_pct: record.progress.progress_pct,
            loss: record.progress.loss,
            lr: record.progress.lr,
            eta_seconds: record.progress.eta_seconds,
            gpu: None::<GpuMetrics>,
            message,
            sample_path,
            checkpoint_path,
            error,
            error_type,
            error_stack,
            timestamp: Utc::now(),
        }
    }
}

fn resolve_outcome(res: Result<PluginOutcome, tokio::task::JoinError>) -> PluginOutcome {
    match res {
        Ok(outcome) => outcome,
        Err(e) if e.is_cancelled() => PluginOutcome::failure("plugin task was aborted", "TaskAborted", ""),
        Err(e) => PluginOutcome::failure(format!("plugin task panicked: {e}"), "TaskPanic", ""),
    }
}

fn stage_name(stage: TrainingStage) -> &'static str {
    match stage {
        TrainingStage::Queued => "queued",
        TrainingStage::Initializing => "initializing",
        TrainingStage::PreparingDataset => "preparing_dataset",
        TrainingStage::Captioning => "captioning",
        TrainingStage::Training => "training",
        TrainingStage::Sampling => "sampling",
        TrainingStage::Exporting => "exporting",
        TrainingStage::Completed => "completed",
        TrainingStage::Failed => "failed",
        TrainingStage::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use async_trait::async_trait;
    use op_bus::InProcessBus;
    use op_core::{CapabilitySchema, JobId, JobType, OpError};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    struct ScriptedTrainingPlugin {
        steps: Vec<PluginProgress>,
        outcome: PluginOutcome,
    }

    #[async_trait]
    impl TrainingPlugin for ScriptedTrainingPlugin {
        fn name(&self) -> &str {
            "scripted"
        }
        fn supported_methods(&self) -> Vec<String> {
            vec!["lora".into()]
        }
        fn get_capabilities(&self) -> CapabilitySchema {
            CapabilitySchema { method: "lora".into(), variants: vec![], toggles: BTreeMap::new(), parameters: BTreeMap::new() }
        }
        async fn train(&self, _run: TrainingRunConfig, tx: mpsc::Sender<PluginProgress>) -> PluginOutcome {
            for step in &self.steps {
                tx.send(step.clone()).await.ok();
            }
            self.outcome.clone()
        }
        async fn cancel(&self) {}
    }

    fn make_record() -> JobRecord {
        JobRecord::new_queued(JobType::Training, serde_json::json!({}), "corr-1")
    }

    #[tokio::test]
    async fn successful_training_run_reaches_completed() {
        let dir = tempdir().unwrap();
        let plane = Arc::new(QueuePlane::new(dir.path()));
        let bus: Arc<dyn ProgressBus> = Arc::new(InProcessBus::default());
        let executor = Executor::new(plane, bus, dir.path().to_path_buf());

        let plugin = Arc::new(ScriptedTrainingPlugin {
            steps: vec![
                PluginProgress { step: Some(1), steps_total: Some(10), ..Default::default() },
                PluginProgress { step: Some(10), steps_total: Some(10), ..Default::default() },
            ],
            outcome: PluginOutcome::success("/out/model.safetensors"),
        });

        let run = TrainingRunConfig {
            job_id: JobId::new(JobType::Training),
            config: serde_json::json!({}),
            images_dir: dir.path().join("images"),
            output_path: dir.path().join("out/model.safetensors"),
            trigger_word: None,
        };

        let record = executor
            .run_training(plugin, make_record(), run, CancellableRun::new(CancellationToken::new()))
            .await;

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress.progress_pct, 100.0);
        assert_eq!(record.output_path.as_deref(), Some("/out/model.safetensors"));
    }

    #[tokio::test]
    async fn failed_plugin_moves_job_to_failed_with_error_detail() {
        let dir = tempdir().unwrap();
        let plane = Arc::new(QueuePlane::new(dir.path()));
        let bus: Arc<dyn ProgressBus> = Arc::new(InProcessBus::default());
        let executor = Executor::new(plane, bus, dir.path().to_path_buf());

        let plugin = Arc::new(ScriptedTrainingPlugin {
            steps: vec![],
            outcome: PluginOutcome::failure("out of memory", "OOMError", "at train() line 1"),
        });

        let run = TrainingRunConfig {
            job_id: JobId::new(JobType::Training),
            config: serde_json::json!({}),
            images_dir: dir.path().join("images"),
            output_path: dir.path().join("out/model.safetensors"),
            trigger_word: None,
        };

        let record = executor
            .run_training(plugin, make_record(), run, CancellableRun::new(CancellationToken::new()))
            .await;

        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("out of memory"));
    }

    struct NeverEndingPlugin;

    #[async_trait]
    impl TrainingPlugin for NeverEndingPlugin {
        fn name(&self) -> &str {
            "forever"
        }
        fn supported_methods(&self) -> Vec<String> {
            vec![]
        }
        fn get_capabilities(&self) -> CapabilitySchema {
            CapabilitySchema { method: "lora".into(), variants: vec![], toggles: BTreeMap::new(), parameters: BTreeMap::new() }
        }
        async fn train(&self, _run: TrainingRunConfig, _tx: mpsc::Sender<PluginProgress>) -> PluginOutcome {
            std::future::pending::<()>().await;
            unreachable!()
        }
        async fn cancel(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_force_terminates_after_grace_period() {
        let dir = tempdir().unwrap();
        let plane = Arc::new(QueuePlane::new(dir.path()));
        let bus: Arc<dyn ProgressBus> = Arc::new(InProcessBus::default());
        let executor = Executor::new(plane, bus, dir.path().to_path_buf());

        let plugin = Arc::new(NeverEndingPlugin);
        let token = CancellationToken::new();
        let run_handle = CancellableRun::new(token.clone());

        let run = TrainingRunConfig {
            job_id: JobId::new(JobType::Training),
            config: serde_json::json!({}),
            images_dir: dir.path().join("images"),
            output_path: dir.path().join("out/model.safetensors"),
            trigger_word: None,
        };

        let task = tokio::spawn(async move { executor.run_training(plugin, make_record(), run, run_handle).await });

        tokio::time::advance(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::advance(CANCEL_GRACE_PERIOD + Duration::from_secs(1)).await;

        let record = task.await.unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
    }

    #[test]
    fn op_error_type_is_reachable_through_plugin_trait() {
        fn assert_send<T: Send>() {}
        assert_send::<Result<(), OpError>>();
    }
}

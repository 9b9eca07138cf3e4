// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job JSONL logging (spec §4.2 "JobLogger", §6 "Per-job JSONL format").

use crate::redact::{redact, redact_value};
use chrono::Utc;
use op_core::{JobLogRecord, LogLevel};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::Mutex as AsyncMutex;

fn lock_registry() -> &'static StdMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>> {
    static REGISTRY: OnceLock<StdMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()))
}

fn lock_for(path: &Path) -> Arc<AsyncMutex<()>> {
    let mut registry = lock_registry().lock().expect("lock registry poisoned");
    registry
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

/// Appends structured records to one job's `<volume_root>/logs/jobs/<job_id>.jsonl`
/// file, mirroring each call into the service log via [`tracing`].
///
/// Concurrent appends to the same file are serialized through a process-wide
/// per-path lock (spec §5 "the JSONL job log is append-shared;
/// implementations MUST append-lock or use atomic line writes").
#[derive(Clone)]
pub struct JobLogger {
    job_id: String,
    service: String,
    path: PathBuf,
    lock: Arc<AsyncMutex<()>>,
}

impl JobLogger {
    /// Opens a logger for `job_id` under `<volume_root>/logs/jobs/`.
    pub fn new(volume_root: &Path, job_id: impl Into<String>, service: impl Into<String>) -> Self {
        let job_id = job_id.into();
        let path = volume_root.join("logs").join("jobs").join(format!("{job_id}.jsonl"));
        Self {
            lock: lock_for(&path),
            job_id,
            service: service.into(),
            path,
        }
    }

    /// Path of this job's JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record. Writes either land atomically or are skipped with
    /// a service-log warning — never partially (spec §4.2).
    pub async fn write(
        &self,
        level: LogLevel,
        msg: impl Into<String>,
        event: Option<&str>,
        fields: Option<serde_json::Value>,
    ) {
        let fields = fields.map(|mut v| {
            redact_value(&mut v);
            v
        });
        let record = JobLogRecord {
            ts: Utc::now(),
            level,
            service: self.service.clone(),
            job_id: self.job_id.clone(),
            msg: msg.into(),
            correlation_id: op_context::get_correlation_id(),
            event: event.map(str::to_string),
            fields,
        };

        let line = match serde_json::to_string(&record) {
            Ok(line) => redact(&line),
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "failed to serialize job log record");
                return;
            }
        };

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(job_id = %self.job_id, error = %e, "failed to create job log directory");
                return;
            }
        }
        let result = {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await {
                Ok(mut file) => file.write_all(format!("{line}\n").as_bytes()).await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = result {
            tracing::warn!(job_id = %self.job_id, error = %e, "failed to append job log line");
        }
    }

    /// `write` at DEBUG.
    pub async fn debug(&self, msg: impl Into<String>, event: Option<&str>, fields: Option<serde_json::Value>) {
        self.write(LogLevel::Debug, msg, event, fields).await;
    }
    /// `write` at INFO.
    pub async fn info(&self, msg: impl Into<String>, event: Option<&str>, fields: Option<serde_json::Value>) {
        self.write(LogLevel::Info, msg, event, fields).await;
    }
    /// `write` at WARNING.
    pub async fn warning(&self, msg: impl Into<String>, event: Option<&str>, fields: Option<serde_json::Value>) {
        self.write(LogLevel::Warning, msg, event, fields).await;
    }
    /// `write` at ERROR.
    pub async fn error(&self, msg: impl Into<String>, event: Option<&str>, fields: Option<serde_json::Value>) {
        self.write(LogLevel::Error, msg, event, fields).await;
    }
}

/// A [`JobLogger`] extended with canonical training-lifecycle helpers
/// (spec §4.2).
#[derive(Clone)]
pub struct TrainingJobLogger {
    inner: JobLogger,
}

impl TrainingJobLogger {
    /// Wraps an existing [`JobLogger`].
    pub fn new(inner: JobLogger) -> Self {
        Self { inner }
    }

    /// Emits `job.started`.
    pub async fn start(&self, steps_total: u64) {
        self.inner
            .info(
                format!("training started, {steps_total} steps planned"),
                Some("job.started"),
                Some(serde_json::json!({ "steps_total": steps_total })),
            )
            .await;
    }

    /// Emits `training.step`.
    pub async fn step(&self, step: u64, steps_total: u64, progress_pct: f64, loss: Option<f64>, lr: Option<f64>) {
        self.inner
            .info(
                format!("step {step}/{steps_total}"),
                Some("training.step"),
                Some(serde_json::json!({
                    "step": step,
                    "steps_total": steps_total,
                    "progress_pct": progress_pct,
                    "loss": loss,
                    "lr": lr,
                })),
            )
            .await;
    }

    /// Emits `training.sample`.
    pub async fn sample_generated(&self, path: &str, step: Option<u64>) {
        self.inner
            .info(
                format!("sample written to {path}"),
                Some("training.sample"),
                Some(serde_json::json!({ "path": path, "step": step })),
            )
            .await;
    }

    /// Emits `training.checkpoint`.
    pub async fn checkpoint_saved(&self, path: &str, step: Option<u64>) {
        self.inner
            .info(
                format!("checkpoint written to {path}"),
                Some("training.checkpoint"),
                Some(serde_json::json!({ "path": path, "step": step })),
            )
            .await;
    }

    /// Emits `job.completed`.
    pub async fn complete(&self, output_path: &str, total_steps: u64, final_loss: Option<f64>) {
        self.inner
            .info(
                format!("training completed, output at {output_path}"),
                Some("job.completed"),
                Some(serde_json::json!({
                    "output_path": output_path,
                    "total_steps": total_steps,
                    "final_loss": final_loss,
                })),
            )
            .await;
    }

    /// Emits `job.failed`, including the full stack trace (authorized only
    /// through the job log / debug bundle, never through the HTTP response).
    pub async fn fail(&self, error: &str, error_type: &str, error_stack: &str) {
        self.inner
            .error(
                error.to_string(),
                Some("job.failed"),
                Some(serde_json::json!({
                    "error_type": error_type,
                    "error_stack": error_stack,
                })),
            )
            .await;
    }
}

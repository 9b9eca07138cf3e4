// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Structured log pipeline: JSON-line formatting, redaction, rotation, and
//! per-job JSONL fan-out (C2).

/// Per-job JSONL writer and training-lifecycle helpers.
pub mod job_logger;
/// The pure redaction function and recursive structured-payload redactor.
pub mod redact;
/// `latest/` <-> `archive/` rotation.
pub mod rotation;
/// The `tracing_subscriber::Layer` that renders spec §4.2's log envelope.
pub mod tracing_layer;

pub use job_logger::{JobLogger, TrainingJobLogger};
pub use redact::{redact, redact_value};

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Options for [`configure`].
pub struct LogPipelineConfig {
    /// The service name tagged on every record (e.g. `"api"`, `"worker"`).
    pub service: String,
    /// Root directory log files live under.
    pub log_root: std::path::PathBuf,
    /// Minimum level to emit (`EnvFilter` syntax, e.g. `"info"`).
    pub log_level: String,
    /// Whether to write JSON lines to stdout.
    pub log_to_stdout: bool,
    /// Whether to write JSON lines to `<log_root>/<service>/latest/<service>.log`.
    pub log_to_file: bool,
    /// Whether to rotate `latest/` into `archive/` before this process's
    /// first write (spec §4.2 `configure(service, rotate=true)`).
    pub rotate: bool,
}

/// Initializes the global `tracing` subscriber for this process.
///
/// Idempotent is the caller's responsibility: call this once per process,
/// per spec §4.2's `configure(service, rotate=true)` contract ("once per
/// process").
///
/// # Errors
///
/// Returns an error if the log file cannot be opened or `latest/` cannot be
/// rotated.
pub fn configure(config: LogPipelineConfig) -> anyhow::Result<()> {
    if config.rotate {
        rotation::rotate(&config.log_root, &config.service)?;
    }

    let mut sinks = tracing_layer::LineSinks::new();
    if config.log_to_stdout {
        sinks = sinks.with_sink(Arc::new(Mutex::new(io::stdout())));
    }
    if config.log_to_file {
        let path = rotation::service_log_path(&config.log_root, &config.service);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        sinks = sinks.with_sink(Arc::new(Mutex::new(file)));
    }

    let layer = tracing_layer::JsonLineLayer::new(config.service.clone(), sinks);
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

/// Mirrors a subprocess's stdout/stderr line into both the service log (via
/// `tracing`) and `<log_root>/<service>/latest/subprocess/<job_id>.{stdout,stderr}.log`
/// (spec §4.5 "Subprocess output capture").
pub async fn append_subprocess_line(
    log_root: &Path,
    service: &str,
    job_id: &str,
    stream: &str,
    line: &str,
) -> io::Result<()> {
    let line = redact::redact(line);
    let path = rotation::subprocess_log_path(log_root, service, job_id, stream);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;

    let event_name = if stream == "stderr" { "subprocess.stderr" } else { "subprocess.stdout" };
    tracing::info!(target: "op.subprocess", job_id = %job_id, event = event_name, "{}", line);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn subprocess_line_is_redacted_on_disk() {
        let dir = tempdir().unwrap();
        append_subprocess_line(dir.path(), "worker", "train-abc123456789", "stdout", "token=hunter2")
            .await
            .unwrap();
        let path = rotation::subprocess_log_path(dir.path(), "worker", "train-abc123456789", "stdout");
        let content = tokio::fs::read_to_string(path).await.unwrap();
        assert_eq!(content.trim(), "token=***");
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Process-wide configuration (spec §6 "ambient"): environment resolution
//! with documented defaults, the `volume_root` priority chain, and the
//! fixed storage contract beneath it.

/// Config-specific errors; these fail process startup, never a request.
pub mod error;
/// `volume_root` resolution and the storage-contract subdirectories.
pub mod paths;

pub use error::ConfigError;
pub use paths::{StoragePaths, LOCAL_FALLBACK, RUNPOD_VOLUME_BASE, STORAGE_CONTRACT_DIRS, WORKSPACE_BASE};

use std::path::PathBuf;
use tracing::warn;

/// The name this deployment's volume is namespaced under, e.g.
/// `/runpod-volume/job-plane`.
pub const APP_NAME: &str = "job-plane";

/// Operating mode (spec §6): `fast-test` short-circuits expensive plugin
/// work for integration tests, `production` runs plugins for real.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Deterministic synthetic plugin behaviour, no real GPU work.
    FastTest,
    /// Real training/generation plugins.
    Production,
}

impl Mode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "fast-test" => Ok(Mode::FastTest),
            "production" => Ok(Mode::Production),
            other => Err(ConfigError::InvalidMode { value: other.to_string() }),
        }
    }
}

/// Which [`op_bus`]-shaped implementation backs the progress bus (spec
/// §4.4/§9: "resolve at startup, inject downstream").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// In-process broadcast bus; API and worker share one process.
    InProcess,
    /// Bus backed by the stream store; API and worker may be separate
    /// processes sharing one volume.
    Stream,
}

impl QueueMode {
    fn parse(value: &str) -> Self {
        match value {
            "stream" => QueueMode::Stream,
            _ => QueueMode::InProcess,
        }
    }
}

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// `fast-test` or `production`.
    pub mode: Mode,
    /// Storage-contract path helpers rooted at the resolved `volume_root`.
    pub storage: StoragePaths,
    /// Root directory service logs rotate under.
    pub log_root: PathBuf,
    /// Minimum level emitted to both sinks, e.g. `"info"`.
    pub log_level: String,
    /// Whether to write `<log_root>/<service>/latest/<service>.log`.
    pub log_to_file: bool,
    /// Whether to additionally emit logs to stdout.
    pub log_to_stdout: bool,
    /// Which `ProgressBus` implementation to construct.
    pub queue_mode: QueueMode,
    /// Connection string for the stream store backing `op-queue`.
    pub stream_store_url: String,
    /// Worker pool size for concurrent job execution.
    pub worker_concurrency: u32,
    /// Base URL of the training plugin sidecar, if running out-of-process.
    pub training_plugin_url: Option<String>,
    /// Base URL of the image-generation plugin sidecar, if out-of-process.
    pub generation_plugin_url: Option<String>,
    /// Host:port the HTTP edge binds to.
    pub bind_addr: String,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok(), |path| path.exists())
    }

    /// Loads configuration from an injected environment lookup and mount
    /// probe, so tests can exercise the resolution chain without mutating
    /// real process environment or filesystem state.
    pub fn resolve(
        env: impl Fn(&str) -> Option<String>,
        mount_exists: impl Fn(&std::path::Path) -> bool,
    ) -> Result<Self, ConfigError> {
        let mode = match env("OP_MODE") {
            Some(value) => Mode::parse(&value)?,
            None => Mode::FastTest,
        };

        let volume_root = paths::resolve_volume_root(env("OP_VOLUME_ROOT").as_deref(), APP_NAME, mount_exists);
        let log_root = env("OP_LOG_ROOT").map(PathBuf::from).unwrap_or_else(|| volume_root.join("logs"));

        let worker_concurrency = parse_u32(env("OP_WORKER_CONCURRENCY"), "OP_WORKER_CONCURRENCY", 1)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::InvalidNumber {
                field: "OP_WORKER_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let config = Config {
            mode,
            storage: StoragePaths::new(volume_root),
            log_root,
            log_level: env("OP_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_to_file: parse_bool(env("OP_LOG_TO_FILE"), true),
            log_to_stdout: parse_bool(env("OP_LOG_TO_STDOUT"), true),
            queue_mode: env("OP_QUEUE_MODE").map(|v| QueueMode::parse(&v)).unwrap_or(QueueMode::InProcess),
            stream_store_url: env("OP_STREAM_STORE_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            worker_concurrency,
            training_plugin_url: env("OP_TRAINING_PLUGIN_URL"),
            generation_plugin_url: env("OP_GENERATION_PLUGIN_URL"),
            bind_addr: env("OP_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
        };

        if config.mode == Mode::Production && config.training_plugin_url.is_none() && config.generation_plugin_url.is_none() {
            warn!("OP_MODE=production but no plugin URL configured; the in-process mock plugins will run instead");
        }

        Ok(config)
    }

    /// Whether `mode` is `production`.
    pub fn is_production(&self) -> bool {
        self.mode == Mode::Production
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => v.eq_ignore_ascii_case("true") || v == "1",
        None => default,
    }
}

fn parse_u32(value: Option<String>, field: &'static str, default: u32) -> Result<u32, ConfigError> {
    match value {
        Some(v) => v.parse::<u32>().map_err(|e| ConfigError::InvalidNumber { field, value: v, reason: e.to_string() }),
        None => Ok(default),
    }
}

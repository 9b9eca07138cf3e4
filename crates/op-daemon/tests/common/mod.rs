// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared harness for `op-daemon`'s end-to-end scenario tests: a real
//! `AppState` (mock plugins, in-process bus, tempdir-backed stores) wired
//! the same way `main.rs` wires it, minus process bootstrap.

use axum::Router;
use op_bus::InProcessBus;
use op_config::{Config, Mode, QueueMode, StoragePaths};
use op_daemon::{plugins, AppState, BusHandle};
use op_executor::Executor;
use op_queue::QueuePlane;
use op_uelr::InteractionStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tempfile::TempDir;

/// Keeps the tempdir alive for the harness's lifetime alongside the state
/// it backs.
#[allow(dead_code)]
pub struct Harness {
    pub state: AppState,
    pub app: Router,
    _volume: TempDir,
}

/// Builds a fresh in-process `AppState` and router rooted at a new tempdir.
#[allow(dead_code)]
pub async fn harness() -> Harness {
    let volume = tempfile::tempdir().expect("tempdir");
    let config = Config {
        mode: Mode::FastTest,
        storage: StoragePaths::new(volume.path().to_path_buf()),
        log_root: volume.path().join("logs"),
        log_level: "info".to_string(),
        log_to_file: false,
        log_to_stdout: false,
        queue_mode: QueueMode::InProcess,
        stream_store_url: "memory://test".to_string(),
        worker_concurrency: 1,
        training_plugin_url: None,
        generation_plugin_url: None,
        bind_addr: "127.0.0.1:0".to_string(),
    };
    let config = Arc::new(config);
    config.storage.ensure_directories().await.expect("ensure storage contract");

    let plane = Arc::new(QueuePlane::new(config.storage.root()));
    let bus = BusHandle::InProcess(Arc::new(InProcessBus::default()));
    let training_plugin = plugins::select_training_plugin(&config);
    let image_plugin = plugins::select_image_plugin(&config);
    let executor = Arc::new(Executor::new(plane.clone(), bus.as_progress_bus(), config.storage.root().to_path_buf()));
    let interactions = Arc::new(InteractionStore::new(config.storage.root().join("uelr")));

    let state = AppState {
        config,
        plane,
        bus,
        executor,
        training_plugin,
        image_plugin,
        interactions,
        cancels: Arc::new(RwLock::new(HashMap::new())),
    };

    tokio::spawn(op_daemon::worker::run(state.clone()));

    let app = op_daemon::build_app(state.clone(), false);
    Harness { state, app, _volume: volume }
}

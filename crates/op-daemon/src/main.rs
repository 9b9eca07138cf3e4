// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use op_bus::{InProcessBus, StreamBackedBus};
use op_config::{Config, QueueMode};
use op_daemon::{plugins, worker, AppState, BusHandle};
use op_executor::Executor;
use op_log::LogPipelineConfig;
use op_queue::QueuePlane;
use op_uelr::InteractionStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// `op-daemon`: the HTTP/SSE edge and its embedded stream-queue worker.
#[derive(Parser, Debug)]
#[command(name = "op-daemon", version, about = "Job orchestration and observability plane")]
struct Args {
    /// Overrides `OP_BIND_ADDR` / the config default.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env().context("resolve configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    let config = Arc::new(config);

    op_log::configure(LogPipelineConfig {
        service: "api".to_string(),
        log_root: config.log_root.clone(),
        log_level: config.log_level.clone(),
        log_to_stdout: config.log_to_stdout,
        log_to_file: config.log_to_file,
        rotate: true,
    })
    .context("configure logging")?;

    config.storage.ensure_directories().await.context("create storage contract directories")?;

    let plane = Arc::new(QueuePlane::new(config.storage.root()));

    let recovered = plane.recover_queued_jobs().await.context("recover queued jobs into the dispatch queue")?;
    if recovered > 0 {
        info!(recovered, "re-enqueued jobs still queued from a previous run");
    }

    let bus = match config.queue_mode {
        QueueMode::InProcess => BusHandle::InProcess(Arc::new(InProcessBus::default())),
        QueueMode::Stream => BusHandle::Stream(Arc::new(StreamBackedBus::new(plane.progress.clone()))),
    };

    let training_plugin = plugins::select_training_plugin(&config);
    let image_plugin = plugins::select_image_plugin(&config);

    let executor = Arc::new(Executor::new(plane.clone(), bus.as_progress_bus(), config.storage.root().to_path_buf()));
    let interactions = Arc::new(InteractionStore::new(config.storage.root().join("uelr")));

    let state = AppState {
        config: config.clone(),
        plane,
        bus,
        executor,
        training_plugin,
        image_plugin,
        interactions,
        cancels: Arc::new(RwLock::new(HashMap::new())),
    };

    // The worker loop runs in every process regardless of queue mode: in
    // `InProcess` mode it is this process's only consumer; in `Stream` mode
    // it lets a single deployment still work without a separate worker
    // process, while a second process pointed at the same volume can run
    // `worker::run` concurrently as an additional consumer.
    tokio::spawn(worker::run(state.clone()));

    let app = op_daemon::build_app(state, config.is_production());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!(bind = %config.bind_addr, mode = ?config.mode, "op-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

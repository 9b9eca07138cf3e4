// SPDX-License-Identifier: MIT OR Apache-2.0
//! Round-robin stream consumer (spec §4.3 "Round-robin dispatch": call
//! `consume` on the training stream first, then the generation stream,
//! sleeping only once both come back empty).
//!
//! `StreamQueue::consume` returns immediately rather than long-polling, so
//! the `block_ms/2` split in spec.md's wording becomes a plain poll-sleep
//! loop here: each iteration tries both streams once, in order, and only
//! sleeps if neither yielded a message.

use crate::AppState;
use op_core::{JobId, JobStatus, JobType};
use op_executor::{CancellableRun, CancellationToken, GenerationRunConfig, TrainingRunConfig};
use std::time::Duration;

/// How long the loop sleeps after a round that dequeued nothing from either
/// stream.
const IDLE_SLEEP: Duration = Duration::from_millis(250);

/// Runs forever, dispatching queued training and generation jobs to the
/// executor. Intended to be `tokio::spawn`ed once per process in
/// [`crate::main`]-style bootstrap when the queue mode calls for an
/// in-process worker.
pub async fn run(state: AppState) {
    loop {
        let training = state.plane.streams.consume(JobType::Training, 1).await;
        let mut dispatched = false;
        for message in training {
            dispatched = true;
            dispatch_training(&state, message).await;
        }

        let generation = state.plane.streams.consume(JobType::Generation, 1).await;
        for message in generation {
            dispatched = true;
            dispatch_generation(&state, message).await;
        }

        reclaim(&state).await;

        if !dispatched {
            tokio::time::sleep(IDLE_SLEEP).await;
        }
    }
}

async fn reclaim(state: &AppState) {
    for job_type in [JobType::Training, JobType::Generation] {
        let expired = state.plane.streams.reclaim_expired(job_type).await;
        for message in expired {
            tracing::warn!(message_id = %message.id, "reclaimed expired stream entry");
        }
    }
}

async fn dispatch_training(state: &AppState, message: op_core::QueueMessage) {
    let job_id = message.payload.get("job_id").and_then(|v| v.as_str()).unwrap_or_default();
    let job_id = JobId::from_raw(job_id);
    let Ok(Some(record)) = state.plane.jobs.get(&job_id).await else {
        tracing::error!(job_id = %job_id, "queued message referenced unknown job record");
        state.plane.streams.acknowledge(JobType::Training, &message.id).await;
        return;
    };
    if record.status != JobStatus::Queued {
        state.plane.streams.acknowledge(JobType::Training, &message.id).await;
        return;
    }

    let images_dir = state.config.storage.datasets_dir().join(job_id.as_str());
    let output_path = state.config.storage.loras_dir().join(format!("{}.safetensors", job_id.as_str()));
    let trigger_word = record.config.get("trigger_word").and_then(|v| v.as_str()).map(str::to_string);

    let run = TrainingRunConfig { job_id: job_id.clone(), config: record.config.clone(), images_dir, output_path, trigger_word };

    let cancel = CancellableRun::new(CancellationToken::new());
    state.cancels.write().expect("cancels lock poisoned").insert(job_id.as_str().to_string(), cancel.clone());

    let executor = state.executor.clone();
    let plugin = state.training_plugin.clone();
    let cancels = state.cancels.clone();
    let streams = state.plane.clone();
    let message_id = message.id.clone();

    tokio::spawn(async move {
        let final_record = executor.run_training(plugin, record, run, cancel).await;
        cancels.write().expect("cancels lock poisoned").remove(job_id.as_str());
        streams.streams.acknowledge(JobType::Training, &message_id).await;
        tracing::info!(job_id = %final_record.id, status = ?final_record.status, "training job finished");
    });
}

async fn dispatch_generation(state: &AppState, message: op_core::QueueMessage) {
    let job_id = message.payload.get("job_id").and_then(|v| v.as_str()).unwrap_or_default();
    let job_id = JobId::from_raw(job_id);
    let Ok(Some(record)) = state.plane.jobs.get(&job_id).await else {
        tracing::error!(job_id = %job_id, "queued message referenced unknown job record");
        state.plane.streams.acknowledge(JobType::Generation, &message.id).await;
        return;
    };
    if record.status != JobStatus::Queued {
        state.plane.streams.acknowledge(JobType::Generation, &message.id).await;
        return;
    }

    let output_dir = state.config.storage.samples_dir(job_id.as_str());
    let lora_path = record.config.get("lora_path").and_then(|v| v.as_str()).map(std::path::PathBuf::from);
    let count = record.config.get("count").and_then(|v| v.as_u64()).unwrap_or(1) as u32;

    let run = GenerationRunConfig { job_id: job_id.clone(), config: record.config.clone(), output_dir, lora_path, count };

    let cancel = CancellableRun::new(CancellationToken::new());
    state.cancels.write().expect("cancels lock poisoned").insert(job_id.as_str().to_string(), cancel.clone());

    let executor = state.executor.clone();
    let plugin = state.image_plugin.clone();
    let cancels = state.cancels.clone();
    let streams = state.plane.clone();
    let message_id = message.id.clone();

    tokio::spawn(async move {
        let final_record = executor.run_generation(plugin, record, run, cancel).await;
        cancels.write().expect("cancels lock poisoned").remove(job_id.as_str());
        streams.streams.acknowledge(JobType::Generation, &message_id).await;
        tracing::info!(job_id = %final_record.id, status = ?final_record.status, "generation job finished");
    });
}

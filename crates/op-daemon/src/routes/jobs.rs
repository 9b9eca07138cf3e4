// SPDX-License-Identifier: MIT OR Apache-2.0
//! Submission, inspection, cancellation, SSE streaming, and observability
//! endpoints shared by training and generation jobs (spec §6).

use crate::{ApiError, AppState, BusSubscription};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use op_bus::{BusEvent, ProgressBus};
use op_core::{JobId, JobRecord, JobType, OpError, OpErrorKind, ProgressEvent, TrainingStage};
use op_executor::CancellationReason;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Body accepted by `POST /api/training` and `POST /api/generation`.
#[derive(Debug, Deserialize)]
pub struct SubmitJob {
    /// Plugin-specific, capability-schema-validated configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// `POST /api/training`.
pub async fn submit_training(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitJob>,
) -> Result<(StatusCode, Json<JobRecord>), ApiError> {
    state.training_plugin.validate_config(&body.config)?;
    let record = submit(&state, JobType::Training, body.config, &headers).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `POST /api/generation`.
pub async fn submit_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitJob>,
) -> Result<(StatusCode, Json<JobRecord>), ApiError> {
    state.image_plugin.check_health().await.map_err(|reason| OpErrorKind::PluginUnavailable { reason })?;
    state.image_plugin.validate_config(&body.config)?;
    let record = submit(&state, JobType::Generation, body.config, &headers).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn submit(
    state: &AppState,
    job_type: JobType,
    config: serde_json::Value,
    headers: &HeaderMap,
) -> Result<JobRecord, ApiError> {
    let correlation_id =
        op_context::RequestContext::resolve_correlation_id(headers.get("x-correlation-id").and_then(|v| v.to_str().ok()));
    let record = JobRecord::new_queued(job_type, config, correlation_id.clone());
    state.plane.jobs.save(record.clone()).await?;
    state
        .plane
        .streams
        .submit(job_type, correlation_id, json!({ "job_id": record.id.as_str() }))
        .await;
    Ok(record)
}

/// `GET /api/training/{id}`, `GET /api/generation/{id}`.
pub async fn get_training(state: State<AppState>, id: Path<String>) -> Result<Json<JobRecord>, ApiError> {
    get_job(state, id).await
}

/// See [`get_training`].
pub async fn get_generation(state: State<AppState>, id: Path<String>) -> Result<Json<JobRecord>, ApiError> {
    get_job(state, id).await
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<JobRecord>, ApiError> {
    let record = state.plane.jobs.get(&JobId::from_raw(id.clone())).await?;
    record.map(Json).ok_or_else(|| job_not_found(&id))
}

/// `POST /api/training/{id}/cancel`.
pub async fn cancel_training(state: State<AppState>, id: Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    cancel_job(state, id).await
}

/// `POST /api/generation/{id}/cancel`.
pub async fn cancel_generation(state: State<AppState>, id: Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    cancel_job(state, id).await
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.plane.jobs.get(&JobId::from_raw(id.clone())).await?.ok_or_else(|| job_not_found(&id))?;

    if record.status.is_terminal() {
        return Err(ApiError::from(OpErrorKind::ResourceConflict { reason: format!("job {id} is already terminal") }));
    }

    let handle = state.cancels.read().expect("cancels lock poisoned").get(&id).cloned();
    match handle {
        Some(handle) => {
            handle
                .cancel(false, CancellationReason::UserRequested)
                .map_err(|_| ApiError::from(OpErrorKind::ResourceConflict { reason: format!("job {id} is already terminal") }))?;
        }
        // Not yet claimed by the worker: cancel the queued record directly,
        // there is no running plugin task to signal.
        None => {
            let cancelled = state
                .plane
                .jobs
                .update_status(&JobId::from_raw(id.clone()), op_core::JobStatus::Cancelled, |r| {
                    r.completed_at = Some(chrono::Utc::now());
                    r.error_message = Some(CancellationReason::UserRequested.description().to_string());
                })
                .await?
                .ok_or_else(|| job_not_found(&id))?;
            state.bus.as_progress_bus().publish(terminal_cancel_event(&cancelled)).await;
        }
    }

    Ok(Json(json!({ "id": id, "cancelling": true })))
}

/// `GET /api/training/{id}/stream`, `GET /api/generation/{id}/stream`,
/// `GET /api/jobs/{id}/stream` — live progress as SSE, replaying retained
/// history before switching to live updates (spec §6 "SSE wire format").
pub async fn stream_training(state: State<AppState>, id: Path<String>) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    stream_job(state, id).await
}

/// See [`stream_training`].
pub async fn stream_generation(state: State<AppState>, id: Path<String>) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    stream_job(state, id).await
}

/// See [`stream_training`].
pub async fn stream_generic(state: State<AppState>, id: Path<String>) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    stream_job(state, id).await
}

async fn stream_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut subscription: BusSubscription = state.bus.subscribe(&id).await;
        while let Some(event) = subscription.recv().await {
            let sse_event = match event {
                BusEvent::Progress(progress) => {
                    let data = serde_json::to_string(&progress).unwrap_or_default();
                    Event::default().event("progress").data(data)
                }
                BusEvent::Keepalive => Event::default().event("keepalive").data(""),
            };
            if tx.send(Ok(sse_event)).await.is_err() {
                break;
            }
        }
    });
    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

/// `GET /api/jobs/{id}/logs` — the job's raw per-job JSONL file.
pub async fn logs(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let path = state.config.storage.jobs_log_dir().join(format!("{id}.jsonl"));
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(([("content-type", "application/x-ndjson")], content).into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(job_not_found(&id)),
        Err(e) => Err(ApiError::from(anyhow::Error::from(e))),
    }
}

/// `GET /api/jobs/{id}/logs/view` — the same log, rendered as one plain-text
/// line per record for quick human inspection.
pub async fn logs_view(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let path = state.config.storage.jobs_log_dir().join(format!("{id}.jsonl"));
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(job_not_found(&id)),
        Err(e) => return Err(ApiError::from(anyhow::Error::from(e))),
    };

    let mut rendered = String::new();
    for line in content.lines() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else { continue };
        let ts = value.get("ts").and_then(|v| v.as_str()).unwrap_or("");
        let level = value.get("level").and_then(|v| v.as_str()).unwrap_or("");
        let msg = value.get("msg").and_then(|v| v.as_str()).unwrap_or("");
        rendered.push_str(&format!("{ts} [{level}] {msg}\n"));
    }
    Ok(([("content-type", "text/plain; charset=utf-8")], rendered).into_response())
}

/// `GET /api/jobs/{id}/artifacts` — lists sample/checkpoint files recorded
/// for this job.
pub async fn artifacts(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let samples_dir = state.config.storage.samples_dir(&id);
    let checkpoints_dir = state.config.storage.checkpoints_dir(&id);
    Ok(Json(json!({
        "samples": list_dir(&samples_dir).await,
        "checkpoints": list_dir(&checkpoints_dir).await,
    })))
}

async fn list_dir(dir: &std::path::Path) -> Vec<String> {
    let mut entries = Vec::new();
    let Ok(mut read_dir) = tokio::fs::read_dir(dir).await else {
        return entries;
    };
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        if let Some(name) = entry.file_name().to_str() {
            entries.push(name.to_string());
        }
    }
    entries.sort();
    entries
}

/// `GET /api/jobs/{id}/artifacts/samples/{name}` — serves one sample file's
/// raw bytes.
pub async fn artifact_sample(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Bytes, ApiError> {
    if name.contains("..") || name.contains('/') {
        return Err(ApiError::from(OpErrorKind::ValidationRejected { reason: "invalid sample name".into() }));
    }
    let path = state.config.storage.samples_dir(&id).join(&name);
    tokio::fs::read(&path)
        .await
        .map(Bytes::from)
        .map_err(|_| ApiError::from(OpErrorKind::ResourceNotFound { resource: format!("sample {name} for job {id}") }))
}

/// `GET /api/jobs/{id}/summary` — a compact status digest, avoiding a full
/// record fetch plus a separate progress query.
pub async fn summary(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.plane.jobs.get(&JobId::from_raw(id.clone())).await?.ok_or_else(|| job_not_found(&id))?;
    Ok(Json(json!({
        "id": record.id.as_str(),
        "job_type": record.job_type,
        "status": record.status,
        "progress_pct": record.progress.progress_pct,
        "created_at": record.created_at,
        "started_at": record.started_at,
        "completed_at": record.completed_at,
        "error_message": record.error_message,
    })))
}

/// `GET /api/jobs/{id}/debug-bundle` — a ZIP of metadata, the job's progress
/// history, service logs, samples, and environment info (spec §6 "debug
/// bundle ZIP layout", §8 scenario 7: `events.jsonl` carries the failure and
/// never a raw secret).
pub async fn debug_bundle(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let record = state.plane.jobs.get(&JobId::from_raw(id.clone())).await?.ok_or_else(|| job_not_found(&id))?;
    let bytes = crate::routes::uelr::build_job_debug_bundle(&state, &record).await?;
    let filename = format!("{id}-debug-bundle.zip");
    Ok((
        [
            ("content-type", "application/zip".to_string()),
            ("content-disposition", format!("attachment; filename=\"{filename}\"")),
        ],
        bytes,
    )
        .into_response())
}

fn job_not_found(id: &str) -> ApiError {
    ApiError::from(OpError::new(OpErrorKind::ResourceNotFound { resource: format!("job {id}") }))
}

fn terminal_cancel_event(record: &JobRecord) -> ProgressEvent {
    ProgressEvent {
        job_id: record.id.clone(),
        correlation_id: Some(record.correlation_id.clone()),
        status: record.status,
        stage: TrainingStage::Cancelled,
        step: record.progress.current_step,
        steps_total: record.progress.total_steps,
        progress_pct: record.progress.progress_pct,
        loss: record.progress.loss,
        lr: record.progress.lr,
        eta_seconds: None,
        gpu: None,
        message: record.error_message.clone().unwrap_or_else(|| "cancelled".into()),
        sample_path: None,
        checkpoint_path: None,
        error: None,
        error_type: None,
        error_stack: None,
        timestamp: chrono::Utc::now(),
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Interaction register CRUD and bundle export (spec §6 `/api/uelr/*`, §8
//! scenario 8), plus the shared ZIP builder `debug-bundle` also uses.

use crate::{ApiError, AppState};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use op_core::{InteractionStatus, InteractionStep, JobRecord, OpError, OpErrorKind};
use op_uelr::{InteractionFilter, NewInteraction};
use serde::Deserialize;
use serde_json::json;
use std::io::Write;

/// Query parameters accepted by `GET /api/uelr/interactions`.
#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    #[serde(default)]
    status: Option<InteractionStatus>,
    #[serde(default)]
    action_category: Option<String>,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /api/uelr/interactions`.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let filter = InteractionFilter { status: query.status, action_category: query.action_category };
    let (page, total, has_more) = state.interactions.list(&filter, query.offset, query.limit).await?;
    Ok(Json(json!({ "interactions": page, "total": total, "has_more": has_more })))
}

/// `POST /api/uelr/interactions`.
pub async fn create(
    State(state): State<AppState>,
    Json(new): Json<NewInteraction>,
) -> Result<(StatusCode, Json<op_core::Interaction>), ApiError> {
    let interaction = state.interactions.create_interaction(new).await?;
    Ok((StatusCode::CREATED, Json(interaction)))
}

/// `GET /api/uelr/interactions/{id}`.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<op_core::Interaction>, ApiError> {
    state.interactions.get(&id).await?.map(Json).ok_or_else(|| interaction_not_found(&id))
}

/// `POST /api/uelr/interactions/{id}/steps`.
pub async fn append_steps(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(steps): Json<Vec<InteractionStep>>,
) -> Result<Json<op_core::Interaction>, ApiError> {
    state.interactions.append_steps(&id, steps).await?.map(Json).ok_or_else(|| interaction_not_found(&id))
}

/// Body accepted by `POST /api/uelr/interactions/{id}/complete`.
#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    status: InteractionStatus,
    #[serde(default)]
    error_summary: Option<String>,
}

/// `POST /api/uelr/interactions/{id}/complete`.
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<op_core::Interaction>, ApiError> {
    state
        .interactions
        .complete(&id, body.status, body.error_summary)
        .await?
        .map(Json)
        .ok_or_else(|| interaction_not_found(&id))
}

/// `DELETE /api/uelr/interactions/{id}`.
pub async fn delete_interaction(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.interactions.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/uelr/interactions/{id}/bundle` — the interaction's own debug
/// bundle (interaction record plus matching log lines), distinct from a
/// job's `debug-bundle`.
pub async fn bundle(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let interaction = state.interactions.get(&id).await?.ok_or_else(|| interaction_not_found(&id))?;
    let bytes = op_uelr::build_bundle(&interaction, &state.config.log_root, true, true).await?;
    Ok((
        [
            ("content-type", "application/zip".to_string()),
            ("content-disposition", format!("attachment; filename=\"{id}-bundle.zip\"")),
        ],
        bytes,
    )
        .into_response())
}

/// Query parameters accepted by `POST /api/uelr/cleanup`.
#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_retention_days")]
    retention_days: i64,
}

fn default_retention_days() -> i64 {
    30
}

/// `POST /api/uelr/cleanup` — deletes interactions older than
/// `retention_days`.
pub async fn cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.interactions.cleanup(query.retention_days).await?;
    Ok(Json(json!({ "removed": removed })))
}

fn interaction_not_found(id: &str) -> ApiError {
    ApiError::from(OpError::new(OpErrorKind::ResourceNotFound { resource: format!("interaction {id}") }))
}

/// Builds the ZIP a job's `debug-bundle` endpoint returns (spec §6 layout:
/// `metadata.json`, `events.jsonl`, `service_logs/<service>.log` tail,
/// `samples/<files>`, `environment.json`, `README.txt`).
pub(crate) async fn build_job_debug_bundle(state: &AppState, record: &JobRecord) -> Result<Vec<u8>, ApiError> {
    use zip::write::SimpleFileOptions;

    let job_id = record.id.as_str();
    let mut buffer = Vec::new();
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buffer));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let metadata = json!({
        "id": job_id,
        "job_type": record.job_type,
        "status": record.status,
        "config": record.config,
        "created_at": record.created_at,
        "started_at": record.started_at,
        "completed_at": record.completed_at,
        "output_path": record.output_path,
        "output_paths": record.output_paths,
        "error_message": record.error_message,
    });
    writer.start_file(format!("{job_id}/metadata.json"), options)?;
    writer.write_all(serde_json::to_string_pretty(&metadata)?.as_bytes())?;

    let job_log_path = state.config.storage.jobs_log_dir().join(format!("{job_id}.jsonl"));
    let events = tokio::fs::read_to_string(&job_log_path).await.unwrap_or_default();
    writer.start_file(format!("{job_id}/events.jsonl"), options)?;
    writer.write_all(events.as_bytes())?;

    for service in ["api", "worker"] {
        let log_path = op_log::rotation::service_log_path(&state.config.log_root, service);
        let tail = tail_lines(&log_path, 1000).await;
        writer.start_file(format!("{job_id}/service_logs/{service}.log"), options)?;
        writer.write_all(tail.as_bytes())?;
    }

    let samples_dir = state.config.storage.samples_dir(job_id);
    if let Ok(mut read_dir) = tokio::fs::read_dir(&samples_dir).await {
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            if let Ok(bytes) = tokio::fs::read(entry.path()).await {
                if let Some(name) = entry.file_name().to_str() {
                    writer.start_file(format!("{job_id}/samples/{name}"), options)?;
                    writer.write_all(&bytes)?;
                }
            }
        }
    }

    let environment = json!({
        "mode": if state.config.is_production() { "production" } else { "fast_test" },
        "training_plugin": state.training_plugin.name(),
        "generation_plugin": state.image_plugin.name(),
        "worker_concurrency": state.config.worker_concurrency,
    });
    writer.start_file(format!("{job_id}/environment.json"), options)?;
    writer.write_all(serde_json::to_string_pretty(&environment)?.as_bytes())?;

    let readme = format!(
        "Debug bundle for job {job_id}\n\nContains metadata.json, events.jsonl (per-job log),\nservice_logs/ (tail of each service's log), samples/ (any\ngenerated sample files), and environment.json.\n"
    );
    writer.start_file(format!("{job_id}/README.txt"), options)?;
    writer.write_all(readme.as_bytes())?;

    writer.finish()?;
    Ok(buffer)
}

async fn tail_lines(path: &std::path::Path, n: usize) -> String {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return String::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

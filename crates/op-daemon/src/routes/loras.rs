// SPDX-License-Identifier: MIT OR Apache-2.0
//! LoRA artifact listing and client-side log ingestion (spec §6
//! `/api/loras…`, `/api/client-logs` — "collaborator endpoints").
//!
//! LoRAs are not a tracked entity of their own; they are files produced by
//! training jobs (under `loras_dir()`) or uploaded directly by an operator
//! (under `uploaded_loras_dir()`). This module only lists and removes them.

use crate::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use op_core::{LogLevel, OpError, OpErrorKind};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path as StdPath, PathBuf};
use tokio::fs;

/// One LoRA file as surfaced to a client.
async fn describe(path: &StdPath, source: &'static str) -> Option<serde_json::Value> {
    let metadata = fs::metadata(path).await.ok()?;
    let name = path.file_name()?.to_str()?.to_string();
    let modified_at = metadata.modified().ok().map(chrono::DateTime::<chrono::Utc>::from);
    Some(json!({
        "id": name,
        "name": name,
        "source": source,
        "size_bytes": metadata.len(),
        "modified_at": modified_at,
    }))
}

/// `GET /api/loras` — lists every trained and uploaded LoRA file.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let mut loras = Vec::new();
    for (dir, source) in [
        (state.config.storage.loras_dir(), "trained"),
        (state.config.storage.uploaded_loras_dir(), "uploaded"),
    ] {
        let Ok(mut read_dir) = fs::read_dir(&dir).await else { continue };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            if let Some(value) = describe(&entry.path(), source).await {
                loras.push(value);
            }
        }
    }
    loras.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Ok(Json(loras))
}

/// `GET /api/loras/{id}` — `id` is the LoRA's file name.
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    find(&state, &id).await.ok_or_else(|| not_found(&id)).map(Json)
}

/// `DELETE /api/loras/{id}`.
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let path = resolve_path(&state, &id).await.ok_or_else(|| not_found(&id))?;
    fs::remove_file(&path).await.map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn find(state: &AppState, id: &str) -> Option<serde_json::Value> {
    let path = resolve_path(state, id).await?;
    let source = if path.starts_with(state.config.storage.uploaded_loras_dir()) { "uploaded" } else { "trained" };
    describe(&path, source).await
}

async fn resolve_path(state: &AppState, id: &str) -> Option<PathBuf> {
    if id.contains('/') || id.contains("..") {
        return None;
    }
    for dir in [state.config.storage.loras_dir(), state.config.storage.uploaded_loras_dir()] {
        let candidate = dir.join(id);
        if fs::metadata(&candidate).await.is_ok() {
            return Some(candidate);
        }
    }
    None
}

fn not_found(id: &str) -> ApiError {
    ApiError::from(OpError::new(OpErrorKind::ResourceNotFound { resource: format!("lora {id}") }))
}

/// One entry in a `POST /api/client-logs` batch: a frontend-originated log
/// line (spec §3 "Log Record" shape, `StepComponent::Frontend`).
#[derive(Debug, Deserialize)]
pub struct ClientLogEntry {
    level: LogLevel,
    msg: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    context: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ClientLogBatch {
    entries: Vec<ClientLogEntry>,
}

/// `POST /api/client-logs` — folds browser-originated log lines into the
/// service log under the active correlation ID, so a frontend error shows up
/// alongside the backend trace for the same request.
pub async fn client_logs(Json(batch): Json<ClientLogBatch>) -> Json<serde_json::Value> {
    let correlation_id = op_context::get_correlation_id();
    for entry in &batch.entries {
        let mut context = entry.context.clone();
        if let Some(value) = context.as_mut() {
            op_log::redact_value(value);
        }
        match entry.level {
            LogLevel::Debug => tracing::debug!(service = "frontend", correlation_id = ?correlation_id, event = ?entry.event, context = ?context, "{}", entry.msg),
            LogLevel::Info => tracing::info!(service = "frontend", correlation_id = ?correlation_id, event = ?entry.event, context = ?context, "{}", entry.msg),
            LogLevel::Warning => tracing::warn!(service = "frontend", correlation_id = ?correlation_id, event = ?entry.event, context = ?context, "{}", entry.msg),
            LogLevel::Error => tracing::error!(service = "frontend", correlation_id = ?correlation_id, event = ?entry.event, context = ?context, "{}", entry.msg),
        }
    }
    Json(json!({ "accepted": batch.entries.len() }))
}

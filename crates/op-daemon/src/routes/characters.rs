// SPDX-License-Identifier: MIT OR Apache-2.0
//! Collaborator (character) CRUD and image upload (spec §6
//! `/api/characters[/{id}[/images]]`).
//!
//! Characters are opaque JSON documents; this layer only assigns IDs on
//! create and merges patches on update, mirroring `CollaboratorStore`'s
//! last-writer-wins contract.

use crate::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use op_core::{OpError, OpErrorKind};
use serde_json::json;
use uuid::Uuid;

/// `GET /api/characters` — lists every known character, in ID order.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let ids = state.plane.collaborators.list_ids().await.map_err(anyhow_to_conflict)?;
    let mut characters = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(value) = state.plane.collaborators.get(&id).await.map_err(anyhow_to_conflict)? {
            characters.push(value);
        }
    }
    Ok(Json(characters))
}

/// `POST /api/characters` — creates a character from an arbitrary JSON body,
/// assigning it a fresh `char-<8 hex>` ID.
pub async fn create(
    State(state): State<AppState>,
    Json(mut body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let id = format!("char-{}", &Uuid::new_v4().simple().to_string()[..8]);
    if let Some(obj) = body.as_object_mut() {
        obj.insert("id".into(), json!(id));
    }
    state.plane.collaborators.put(&id, body.clone()).await.map_err(anyhow_to_conflict)?;
    Ok((StatusCode::CREATED, Json(body)))
}

/// `GET /api/characters/{id}` — fetches one character.
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let character = state.plane.collaborators.get(&id).await.map_err(anyhow_to_conflict)?;
    character.map(Json).ok_or_else(|| not_found(&id))
}

/// `PATCH /api/characters/{id}` — shallow-merges the request body into the
/// stored document.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut current = state.plane.collaborators.get(&id).await.map_err(anyhow_to_conflict)?.ok_or_else(|| not_found(&id))?;
    if let (Some(current_obj), Some(patch_obj)) = (current.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            current_obj.insert(key.clone(), value.clone());
        }
    }
    state.plane.collaborators.put(&id, current.clone()).await.map_err(anyhow_to_conflict)?;
    Ok(Json(current))
}

/// `DELETE /api/characters/{id}`.
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.plane.collaborators.delete(&id).await.map_err(anyhow_to_conflict)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/characters/{id}/images` — stores a raw image upload under the
/// collaborator's upload directory and records its path on the character.
pub async fn upload_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut character = state.plane.collaborators.get(&id).await.map_err(anyhow_to_conflict)?.ok_or_else(|| not_found(&id))?;

    let dir = state.config.storage.uploads_dir().join(&id);
    tokio::fs::create_dir_all(&dir).await.map_err(anyhow::Error::from).map_err(anyhow_to_conflict)?;
    let filename = format!("{}.bin", &Uuid::new_v4().simple().to_string()[..12]);
    let path = dir.join(&filename);
    tokio::fs::write(&path, &body).await.map_err(anyhow::Error::from).map_err(anyhow_to_conflict)?;

    if let Some(obj) = character.as_object_mut() {
        let images = obj.entry("images").or_insert_with(|| json!([]));
        if let Some(arr) = images.as_array_mut() {
            arr.push(json!(path.display().to_string()));
        }
    }
    state.plane.collaborators.put(&id, character.clone()).await.map_err(anyhow_to_conflict)?;
    Ok(Json(character))
}

fn not_found(id: &str) -> ApiError {
    ApiError::from(OpError::new(OpErrorKind::ResourceNotFound { resource: format!("character {id}") }))
}

fn anyhow_to_conflict(err: anyhow::Error) -> ApiError {
    ApiError::from(err)
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Liveness, readiness, and capability advertisement (spec §6).

use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::json;

/// `GET /health`, `GET /api/health` — process is up, no dependency checks.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/ready` — process is up and its image plugin answers a health
/// check (spec §4.5 submission path step 3, reused here as the readiness
/// signal).
pub async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.image_plugin.check_health().await {
        Ok(()) => Json(json!({ "status": "ready" })),
        Err(reason) => Json(json!({ "status": "not_ready", "reason": reason })),
    }
}

/// `GET /api/info` — advertises both plugins' capability schemas, so a
/// frontend can render the submission form without a separate call per job
/// type (spec §3 "Capability Schema").
pub async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "job-plane",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": if state.config.is_production() { "production" } else { "fast_test" },
        "training": {
            "plugin": state.training_plugin.name(),
            "capabilities": state.training_plugin.get_capabilities(),
        },
        "generation": {
            "plugin": state.image_plugin.name(),
            "capabilities": state.image_plugin.get_capabilities(),
            "workflows": state.image_plugin.list_workflows(),
        },
    }))
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end training scenarios (spec §8 scenarios 1, 2, 3, 6).

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post(app: axum::Router, uri: &str, correlation_id: Option<&str>, body: Value) -> axum::response::Response {
    let mut builder = Request::builder().method("POST").uri(uri).header("content-type", "application/json");
    if let Some(cid) = correlation_id {
        builder = builder.header("x-correlation-id", cid);
    }
    app.oneshot(builder.body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap()).await.unwrap()
}

async fn get(app: axum::Router, uri: &str) -> axum::response::Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap()
}

#[tokio::test]
async fn happy_path_training_completes_with_output_and_full_progress() {
    let harness = common::harness().await;

    let resp = post(
        harness.app.clone(),
        "/api/training",
        Some("c1"),
        json!({ "config": { "steps": 100 } }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("train-"));

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    let record = loop {
        let resp = get(harness.app.clone(), &format!("/api/training/{id}")).await;
        let record = body_json(resp).await;
        if record["status"] == "completed" || record["status"] == "failed" {
            break record;
        }
        assert!(tokio::time::Instant::now() < deadline, "job did not finish in time: {record:?}");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    };

    assert_eq!(record["status"], "completed");
    assert_eq!(record["progress"]["progress_pct"], 100.0);
    let output_path = record["output_path"].as_str().expect("output_path set");
    assert!(std::path::Path::new(output_path).exists(), "sidecar output file should exist");
}

#[tokio::test]
async fn cancelling_a_job_reaches_cancelled_with_exactly_one_terminal_frame() {
    let harness = common::harness().await;

    let resp = post(
        harness.app.clone(),
        "/api/training",
        Some("c2"),
        json!({ "config": { "steps": 10_000 } }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let resp = post(harness.app.clone(), &format!("/api/training/{id}/cancel"), None, json!({})).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    let record = loop {
        let resp = get(harness.app.clone(), &format!("/api/training/{id}")).await;
        let record = body_json(resp).await;
        if record["status"] != "running" && record["status"] != "queued" {
            break record;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never reached a terminal state: {record:?}");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };

    assert_eq!(record["status"], "cancelled");

    let history = harness.state.bus.history(&id).await;
    let terminal_frames: Vec<_> = history.iter().filter(|event| event.stage.is_terminal()).collect();
    assert_eq!(terminal_frames.len(), 1, "exactly one terminal frame expected, got {terminal_frames:?}");
    assert_eq!(format!("{:?}", terminal_frames[0].status), "Cancelled");
}

#[tokio::test]
async fn unwired_parameter_is_rejected_with_the_plugin_reason() {
    let harness = common::harness().await;

    let resp = post(
        harness.app.clone(),
        "/api/training",
        Some("c3"),
        json!({ "config": { "steps": 100, "gradient_accumulation": 2 } }),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("gradient_accumulation"), "reason should name the field: {detail}");
    assert!(detail.contains("Not implemented in mock plugin"), "reason should echo the plugin's reason: {detail}");
}

#[tokio::test]
async fn secrets_in_job_config_are_redacted_in_the_per_job_log() {
    let harness = common::harness().await;

    let resp = post(
        harness.app.clone(),
        "/api/training",
        Some("c6"),
        json!({ "config": { "steps": 10, "trigger_word": "hf_abc123 secret" } }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let resp = get(harness.app.clone(), &format!("/api/training/{id}")).await;
        let record = body_json(resp).await;
        if record["status"] == "completed" || record["status"] == "failed" {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job did not finish in time");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let resp = get(harness.app.clone(), &format!("/api/jobs/{id}/logs")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let log = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(log.contains("hf_***REDACTED***"), "log should contain the redacted marker:\n{log}");
    assert!(!log.contains("hf_abc123 secret"), "log must not contain the raw secret:\n{log}");
}

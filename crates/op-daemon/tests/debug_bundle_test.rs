// SPDX-License-Identifier: MIT OR Apache-2.0
//! Debug bundle export after a failed job (spec §8 scenario 7).

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::io::{Cursor, Read};
use tower::ServiceExt;

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn debug_bundle_for_a_failed_job_carries_metadata_and_no_raw_secret() {
    let harness = common::harness().await;

    let resp = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/training")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json!({ "config": { "steps": 100, "trigger_word": "hf_abc123 secret" } })).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();

    // The mock plugin writes its final LoRA artifact by `fs::write`ing the
    // job's output path; pre-occupy that exact path with a directory so the
    // write fails with a real, deterministic I/O error and the job lands in
    // `failed` without needing to touch filesystem permissions (tests run
    // as root, where permission bits are no obstacle).
    let output_path = harness.state.config.storage.loras_dir().join(format!("{id}.safetensors"));
    tokio::fs::create_dir_all(&output_path).await.expect("pre-occupy the output path with a directory");

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let resp = harness
            .app
            .clone()
            .oneshot(Request::builder().uri(format!("/api/training/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let record = body_json(resp).await;
        if record["status"] != "running" && record["status"] != "queued" {
            assert_eq!(record["status"], "failed", "the blocked output path should force a failure: {record:?}");
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never reached a terminal state");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let resp = harness
        .app
        .clone()
        .oneshot(Request::builder().uri(format!("/api/jobs/{id}/debug-bundle")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).expect("valid zip archive");
    let mut names: Vec<String> = (0..archive.len()).map(|i| archive.by_index(i).unwrap().name().to_string()).collect();
    names.sort();

    assert!(names.iter().any(|n| n.ends_with("metadata.json")), "{names:?}");
    assert!(names.iter().any(|n| n.ends_with("events.jsonl")), "{names:?}");
    assert!(names.iter().any(|n| n.ends_with("environment.json")), "{names:?}");
    assert!(names.iter().any(|n| n.ends_with("README.txt")), "{names:?}");

    let events_name = names.iter().find(|n| n.ends_with("events.jsonl")).unwrap().clone();
    let mut events = String::new();
    archive.by_name(&events_name).unwrap().read_to_string(&mut events).unwrap();

    let has_error_entry = events
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<Value>(line).expect("each event line is valid JSON"))
        .any(|entry| entry["level"] == "ERROR");
    assert!(has_error_entry, "events.jsonl should contain at least one error-level entry:\n{events}");

    assert!(!events.contains("hf_abc123 secret"), "debug bundle must never carry the raw secret:\n{events}");
}

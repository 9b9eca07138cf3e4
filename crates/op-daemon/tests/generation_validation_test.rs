// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generation toggle rejection (spec §8 scenario 4).

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

#[tokio::test]
async fn unknown_toggle_is_rejected_with_a_reason() {
    let harness = common::harness().await;

    // The mock image plugin supports every `use_*` toggle it advertises; a
    // toggle the schema doesn't know about is rejected the same way a
    // `supported: false` one would be, via the same validation path (spec
    // §4.5 "unwired rejection").
    let resp = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/generation")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json!({ "config": { "width": 512, "height": 512, "use_nonexistent_toggle": true } })).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("use_nonexistent_toggle"), "reason should name the offending toggle: {detail}");
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Round-robin dispatch fairness (spec §8 scenario 5).
//!
//! Drives the same one-consume-per-stream-per-iteration pattern
//! `worker::run` uses directly against `StreamQueue`, so the assertion is
//! about dispatch order rather than end-to-end job completion timing.

use op_core::JobType;
use op_queue::StreamQueue;
use serde_json::json;

#[tokio::test]
async fn alternating_submissions_dequeue_in_alternating_stream_order() {
    let streams = StreamQueue::new();

    let mut training_ids = Vec::new();
    let mut generation_ids = Vec::new();
    for i in 0..3 {
        training_ids.push(streams.submit(JobType::Training, format!("c-train-{i}"), json!({ "job_id": format!("train-{i}") })).await);
        generation_ids.push(streams.submit(JobType::Generation, format!("c-gen-{i}"), json!({ "job_id": format!("gen-{i}") })).await);
    }

    let mut dispatch_order = Vec::new();
    for _ in 0..3 {
        for message in streams.consume(JobType::Training, 1).await {
            dispatch_order.push(("training", message.payload["job_id"].as_str().unwrap().to_string()));
            streams.acknowledge(JobType::Training, &message.id).unwrap();
        }
        for message in streams.consume(JobType::Generation, 1).await {
            dispatch_order.push(("generation", message.payload["job_id"].as_str().unwrap().to_string()));
            streams.acknowledge(JobType::Generation, &message.id).unwrap();
        }
    }

    let kinds: Vec<&str> = dispatch_order.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds, vec!["training", "generation", "training", "generation", "training", "generation"]);

    let training_dispatched: Vec<&str> =
        dispatch_order.iter().filter(|(kind, _)| *kind == "training").map(|(_, id)| id.as_str()).collect();
    assert_eq!(training_dispatched, vec!["train-0", "train-1", "train-2"], "training jobs dequeue in submission order");

    let generation_dispatched: Vec<&str> =
        dispatch_order.iter().filter(|(kind, _)| *kind == "generation").map(|(_, id)| id.as_str()).collect();
    assert_eq!(generation_dispatched, vec!["gen-0", "gen-1", "gen-2"], "generation jobs dequeue in submission order");
}

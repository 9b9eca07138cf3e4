// SPDX-License-Identifier: MIT OR Apache-2.0
//! ZIP bundle export (spec §4.6 "Bundle").

use anyhow::{Context, Result};
use op_core::{Interaction, LogRecord};
use op_log::redact;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Service name the backend/edge process logs under.
pub const BACKEND_SERVICE: &str = "api";
/// Service name worker processes log under.
pub const WORKER_SERVICE: &str = "worker";

/// Builds the ZIP bytes for one interaction's debug bundle.
///
/// Contains `interaction.json` (the full record, steps included) and,
/// when requested, `backend_logs.jsonl`/`worker_logs.jsonl` — every line
/// from that service's current log file whose `correlation_id` or
/// `context.interaction_id` matches this interaction, redacted.
pub async fn build_bundle(
    interaction: &Interaction,
    log_root: &Path,
    include_backend: bool,
    include_worker: bool,
) -> Result<Vec<u8>> {
    let interaction_json = redact(&serde_json::to_string_pretty(interaction)?);

    let backend_lines = if include_backend {
        matching_log_lines(log_root, BACKEND_SERVICE, interaction).await?
    } else {
        Vec::new()
    };
    let worker_lines = if include_worker {
        matching_log_lines(log_root, WORKER_SERVICE, interaction).await?
    } else {
        Vec::new()
    };

    write_zip(&interaction_json, &backend_lines, &worker_lines)
}

async fn matching_log_lines(log_root: &Path, service: &str, interaction: &Interaction) -> Result<Vec<String>> {
    let path = op_log::rotation::service_log_path(log_root, service);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read {service} log at {}", path.display())),
    };

    let mut matched = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<LogRecord>(line) else {
            continue;
        };
        let correlation_matches = record.correlation_id.as_deref() == Some(interaction.correlation_id.as_str());
        let interaction_matches = record
            .context
            .as_ref()
            .and_then(|c| c.get("interaction_id"))
            .and_then(|v| v.as_str())
            == Some(interaction.interaction_id.as_str());
        if correlation_matches || interaction_matches {
            matched.push(redact(line));
        }
    }
    Ok(matched)
}

fn write_zip(interaction_json: &str, backend_lines: &[String], worker_lines: &[String]) -> Result<Vec<u8>> {
    let buf = Vec::new();
    let cursor = std::io::Cursor::new(buf);
    let mut zip = ZipWriter::new(cursor);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("interaction.json", options)?;
    zip.write_all(interaction_json.as_bytes())?;

    zip.start_file("backend_logs.jsonl", options)?;
    for line in backend_lines {
        writeln!(zip, "{line}")?;
    }

    zip.start_file("worker_logs.jsonl", options)?;
    for line in worker_lines {
        writeln!(zip, "{line}")?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Interaction persistence (spec §4.6 "On-disk layout").
//!
//! Per interaction: one JSONL file, first line the header, remaining lines
//! append-only steps. A secondary index file mirrors every header, sorted
//! descending by `started_at`, capped at [`MAX_INTERACTIONS`].
//!
//! Rather than true append-in-place on the header line (which would need
//! fixed-width records), every save rewrites the whole interaction file from
//! the in-memory `Interaction` — the same full-rewrite idiom `op-queue`'s
//! `JobStore::save` already uses. The two invariants the format promises
//! (header first, steps never removed once appended) hold regardless of how
//! the bytes on disk got there.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use op_core::{Interaction, InteractionStatus, InteractionStep};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Index entries past this count, oldest `started_at` first, are evicted
/// along with their interaction files (spec §4.6).
pub const MAX_INTERACTIONS: usize = 1000;

/// Fields needed to start a new interaction; everything else is computed.
#[derive(Debug, Clone, Deserialize)]
pub struct NewInteraction {
    /// Caller-supplied identifier. Creating with one already in use is a
    /// no-op that returns the existing interaction (spec: "idempotent on
    /// `interaction_id`").
    pub interaction_id: String,
    /// Correlation ID of the request that started this interaction.
    pub correlation_id: String,
    /// Name of the action this interaction represents.
    pub action_name: String,
    /// Optional grouping category.
    #[serde(default)]
    pub action_category: Option<String>,
    /// Originating page/route, if known.
    #[serde(default)]
    pub page: Option<String>,
    /// Originating client user agent, if known.
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Filters accepted by [`InteractionStore::list`].
#[derive(Debug, Clone, Default)]
pub struct InteractionFilter {
    /// Restrict to interactions with this lifecycle status.
    pub status: Option<InteractionStatus>,
    /// Restrict to interactions in this action category.
    pub action_category: Option<String>,
}

/// File-based interaction store rooted at `<uelr_root>`.
pub struct InteractionStore {
    root: PathBuf,
    index: RwLock<BTreeMap<String, Interaction>>,
}

impl InteractionStore {
    /// Opens a store rooted at `root` (the storage contract's `uelr_root`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), index: RwLock::new(BTreeMap::new()) }
    }

    fn file_path(&self, interaction_id: &str) -> PathBuf {
        self.root.join("interactions").join(format!("{interaction_id}.jsonl"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index").join("interactions.jsonl")
    }

    /// Creates a new interaction, or returns the existing one unchanged if
    /// `interaction_id` is already in use.
    pub async fn create_interaction(&self, new: NewInteraction) -> Result<Interaction> {
        if let Some(existing) = self.get(&new.interaction_id).await? {
            return Ok(existing);
        }
        let interaction = Interaction {
            interaction_id: new.interaction_id,
            correlation_id: new.correlation_id,
            action_name: new.action_name,
            action_category: new.action_category,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            status: InteractionStatus::InProgress,
            error_summary: None,
            page: new.page,
            user_agent: new.user_agent,
            step_count: 0,
            error_count: 0,
            steps: Vec::new(),
        };
        self.write_full(&interaction).await?;
        self.upsert_index(&interaction).await?;
        Ok(interaction)
    }

    /// Appends `steps`, redacting each step's `details` first, and persists
    /// updated `step_count`/`error_count`.
    pub async fn append_steps(&self, interaction_id: &str, mut steps: Vec<InteractionStep>) -> Result<Option<Interaction>> {
        let Some(mut interaction) = self.read_full(interaction_id).await? else {
            return Ok(None);
        };
        for step in &mut steps {
            if let Some(details) = step.details.as_mut() {
                op_log::redact_value(details);
            }
            if step.status == "error" {
                interaction.error_count += 1;
            }
            interaction.step_count += 1;
        }
        interaction.steps.extend(steps);
        self.write_full(&interaction).await?;
        self.upsert_index(&interaction).await?;
        Ok(Some(interaction))
    }

    /// Marks an interaction complete, computing `duration_ms` from its
    /// `started_at`/`ended_at` pair.
    pub async fn complete(
        &self,
        interaction_id: &str,
        status: InteractionStatus,
        error_summary: Option<String>,
    ) -> Result<Option<Interaction>> {
        let Some(mut interaction) = self.read_full(interaction_id).await? else {
            return Ok(None);
        };
        let ended_at = Utc::now();
        interaction.duration_ms =
            has_valid_span(interaction.started_at, Some(ended_at)).then(|| (ended_at - interaction.started_at).num_milliseconds());
        interaction.ended_at = Some(ended_at);
        interaction.status = status;
        interaction.error_summary = error_summary;
        self.write_full(&interaction).await?;
        self.upsert_index(&interaction).await?;
        Ok(Some(interaction))
    }

    /// Reads one interaction, with its full step history.
    pub async fn get(&self, interaction_id: &str) -> Result<Option<Interaction>> {
        self.read_full(interaction_id).await
    }

    /// Lists interactions newest-first, applying `filter`, `offset`/`limit`.
    pub async fn list(&self, filter: &InteractionFilter, offset: usize, limit: usize) -> Result<(Vec<Interaction>, usize, bool)> {
        self.hydrate_index_if_empty().await?;
        let mut matching: Vec<Interaction> = {
            let index = self.index.read().await;
            index
                .values()
                .filter(|i| filter.status.is_none_or(|s| i.status == s))
                .filter(|i| filter.action_category.as_deref().is_none_or(|c| i.action_category.as_deref() == Some(c)))
                .cloned()
                .collect()
        };
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let total = matching.len();
        let page: Vec<Interaction> = matching.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + page.len() < total;
        Ok((page, total, has_more))
    }

    /// Removes an interaction's file and index entry. No error if absent.
    pub async fn delete(&self, interaction_id: &str) -> Result<()> {
        self.hydrate_index_if_empty().await?;
        match tokio::fs::remove_file(self.file_path(interaction_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("delete interaction file"),
        }
        self.index.write().await.remove(interaction_id);
        self.rewrite_index().await
    }

    /// Deletes every interaction whose `started_at` is older than
    /// `now - retention_days`, returning how many were removed.
    pub async fn cleanup(&self, retention_days: i64) -> Result<usize> {
        self.hydrate_index_if_empty().await?;
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let stale: Vec<String> = {
            let index = self.index.read().await;
            index.values().filter(|i| i.started_at < cutoff).map(|i| i.interaction_id.clone()).collect()
        };
        for id in &stale {
            self.delete(id).await?;
        }
        Ok(stale.len())
    }

    async fn read_full(&self, interaction_id: &str) -> Result<Option<Interaction>> {
        let path = self.file_path(interaction_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("read interaction file"),
        };
        parse_interaction_file(&text).map(Some)
    }

    async fn write_full(&self, interaction: &Interaction) -> Result<()> {
        let path = self.file_path(&interaction.interaction_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| format!("create interaction dir {}", parent.display()))?;
        }
        let body = render_interaction_file(interaction)?;
        tokio::fs::write(&path, body).await.with_context(|| format!("write interaction to {}", path.display()))?;
        Ok(())
    }

    async fn upsert_index(&self, interaction: &Interaction) -> Result<()> {
        self.hydrate_index_if_empty().await?;
        let mut header = interaction.clone();
        header.steps.clear();
        self.index.write().await.insert(interaction.interaction_id.clone(), header);
        self.rewrite_index().await
    }

    async fn rewrite_index(&self) -> Result<()> {
        let mut entries: Vec<Interaction> = self.index.read().await.values().cloned().collect();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let evicted: Vec<String> = entries.iter().skip(MAX_INTERACTIONS).map(|i| i.interaction_id.clone()).collect();
        entries.truncate(MAX_INTERACTIONS);
        if !evicted.is_empty() {
            let mut index = self.index.write().await;
            for id in &evicted {
                index.remove(id);
            }
            for id in &evicted {
                tokio::fs::remove_file(self.file_path(id)).await.ok();
            }
        }

        let path = self.index_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| format!("create index dir {}", parent.display()))?;
        }
        let mut body = String::new();
        for header in &entries {
            body.push_str(&serde_json::to_string(header)?);
            body.push('\n');
        }
        tokio::fs::write(&path, body).await.with_context(|| format!("write index to {}", path.display()))?;
        Ok(())
    }

    async fn hydrate_index_if_empty(&self) -> Result<()> {
        if !self.index.read().await.is_empty() {
            return Ok(());
        }
        let path = self.index_path();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).context("read interaction index"),
        };
        let mut index = self.index.write().await;
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(header) = serde_json::from_str::<Interaction>(line) {
                index.insert(header.interaction_id.clone(), header);
            }
        }
        Ok(())
    }
}

fn render_interaction_file(interaction: &Interaction) -> Result<String> {
    let mut header = interaction.clone();
    let steps = std::mem::take(&mut header.steps);

    let mut out = String::new();
    out.push_str(&tagged_line(&header, "interaction")?);
    for step in &steps {
        out.push_str(&tagged_line(step, "step")?);
    }
    Ok(out)
}

fn tagged_line<T: serde::Serialize>(value: &T, tag: &str) -> Result<String> {
    let mut json = serde_json::to_value(value)?;
    if let serde_json::Value::Object(map) = &mut json {
        map.insert("_type".to_string(), serde_json::Value::String(tag.to_string()));
    }
    let mut line = serde_json::to_string(&json)?;
    line.push('\n');
    Ok(line)
}

fn parse_interaction_file(text: &str) -> Result<Interaction> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header_line = lines.next().context("interaction file has no header line")?;
    let mut interaction: Interaction = serde_json::from_str(header_line).context("parse interaction header")?;
    interaction.steps = lines
        .map(|line| serde_json::from_str::<InteractionStep>(line).context("parse interaction step"))
        .collect::<Result<Vec<_>>>()?;
    Ok(interaction)
}

/// Whether `ended_at` is set and does not precede `started_at` — the
/// closest Rust analogue of the spec's "both timestamps valid RFC-3339 at
/// complete time" guard, since both fields are already typed `DateTime<Utc>`
/// here rather than loosely-typed strings.
fn has_valid_span(started_at: DateTime<Utc>, ended_at: Option<DateTime<Utc>>) -> bool {
    ended_at.is_some_and(|end| end >= started_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::StepComponent;
    use tempfile::tempdir;

    fn new_interaction(id: &str) -> NewInteraction {
        NewInteraction {
            interaction_id: id.to_string(),
            correlation_id: "corr-1".to_string(),
            action_name: "upload_image".to_string(),
            action_category: Some("upload".to_string()),
            page: Some("/studio".to_string()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    fn step(status: &str) -> InteractionStep {
        InteractionStep {
            step_id: uuid::Uuid::new_v4().to_string(),
            interaction_id: "i1".to_string(),
            correlation_id: "corr-1".to_string(),
            step_type: "http.request".to_string(),
            component: StepComponent::Backend,
            timestamp: Utc::now(),
            duration_ms: Some(12),
            message: "handled request".to_string(),
            status: status.to_string(),
            details: Some(serde_json::json!({"token": "hf_abc123"})),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_on_interaction_id() {
        let dir = tempdir().unwrap();
        let store = InteractionStore::new(dir.path());
        let first = store.create_interaction(new_interaction("i1")).await.unwrap();
        let second = store.create_interaction(new_interaction("i1")).await.unwrap();
        assert_eq!(first.started_at, second.started_at);
    }

    #[tokio::test]
    async fn append_steps_is_additive_and_redacts_details() {
        let dir = tempdir().unwrap();
        let store = InteractionStore::new(dir.path());
        store.create_interaction(new_interaction("i1")).await.unwrap();

        store.append_steps("i1", vec![step("ok")]).await.unwrap().unwrap();
        let interaction = store.append_steps("i1", vec![step("error")]).await.unwrap().unwrap();

        assert_eq!(interaction.steps.len(), 2);
        assert_eq!(interaction.step_count, 2);
        assert_eq!(interaction.error_count, 1);
        assert_eq!(interaction.steps[0].details.as_ref().unwrap()["token"], "hf_***REDACTED***");
    }

    #[tokio::test]
    async fn complete_computes_duration_and_status() {
        let dir = tempdir().unwrap();
        let store = InteractionStore::new(dir.path());
        store.create_interaction(new_interaction("i1")).await.unwrap();
        store.append_steps("i1", vec![step("ok")]).await.unwrap();

        let completed = store
            .complete("i1", InteractionStatus::Success, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(completed.status, InteractionStatus::Success);
        assert!(completed.duration_ms.unwrap() >= 0);
        assert!(completed.ended_at.is_some());
    }

    #[tokio::test]
    async fn first_line_on_disk_is_always_the_header() {
        let dir = tempdir().unwrap();
        let store = InteractionStore::new(dir.path());
        store.create_interaction(new_interaction("i1")).await.unwrap();
        store.append_steps("i1", vec![step("ok"), step("ok")]).await.unwrap();

        let text = tokio::fs::read_to_string(store.file_path("i1")).await.unwrap();
        let mut lines = text.lines();
        let header: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(header["_type"], "interaction");
        for line in lines {
            let step: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(step["_type"], "step");
        }
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginates() {
        let dir = tempdir().unwrap();
        let store = InteractionStore::new(dir.path());
        store.create_interaction(new_interaction("i1")).await.unwrap();
        store.create_interaction(new_interaction("i2")).await.unwrap();
        store.create_interaction(new_interaction("i3")).await.unwrap();

        let (page, total, has_more) = store.list(&InteractionFilter::default(), 0, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert!(has_more);
        assert_eq!(page[0].interaction_id, "i3");
    }

    #[tokio::test]
    async fn delete_removes_file_and_index_entry() {
        let dir = tempdir().unwrap();
        let store = InteractionStore::new(dir.path());
        store.create_interaction(new_interaction("i1")).await.unwrap();
        store.delete("i1").await.unwrap();

        assert!(store.get("i1").await.unwrap().is_none());
        let (page, total, _) = store.list(&InteractionFilter::default(), 0, 10).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn cleanup_evicts_only_stale_entries() {
        let dir = tempdir().unwrap();
        let store = InteractionStore::new(dir.path());
        store.create_interaction(new_interaction("fresh")).await.unwrap();

        let mut stale = store.get("fresh").await.unwrap().unwrap();
        stale.interaction_id = "stale".to_string();
        stale.started_at = Utc::now() - chrono::Duration::days(400);
        store.write_full(&stale).await.unwrap();
        store.upsert_index(&stale).await.unwrap();

        let removed = store.cleanup(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("stale").await.unwrap().is_none());
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[test]
    fn has_valid_span_rejects_end_before_start() {
        let start = Utc::now();
        let end = start - chrono::Duration::seconds(5);
        assert!(!has_valid_span(start, Some(end)));
        assert!(!has_valid_span(start, None));
    }
}

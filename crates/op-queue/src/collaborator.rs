// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic opaque-JSON auxiliary entity store (spec §4.3 "collaborator
//! metadata"; originally characters/LoRAs in the source system, generalized
//! here to any non-job entity a plugin or route needs addressable by ID).

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// One file-per-entity store under `<volume_root>/<collection>/<id>.json`.
///
/// Last-writer-wins on concurrent updates to the same ID — no compare-and-
/// swap, matching the source system's behavior (spec §9 Open Question
/// resolution: "accept last-writer-wins rather than introduce a versioning
/// scheme the spec never asked for").
pub struct CollaboratorStore {
    root: PathBuf,
    index: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl CollaboratorStore {
    /// Opens a store rooted at `<volume_root>/<collection>/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), index: RwLock::new(BTreeMap::new()) }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Inserts or overwrites the entity at `id`.
    pub async fn put(&self, id: &str, value: serde_json::Value) -> Result<()> {
        let path = self.path_for(id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| format!("create store dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&value)?;
        tokio::fs::write(&path, json).await.with_context(|| format!("write entity to {}", path.display()))?;
        self.index.write().await.insert(id.to_string(), value);
        Ok(())
    }

    /// Reads the entity at `id`, if present.
    pub async fn get(&self, id: &str) -> Result<Option<serde_json::Value>> {
        if let Some(value) = self.index.read().await.get(id) {
            return Ok(Some(value.clone()));
        }
        let path = self.path_for(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let value: serde_json::Value = serde_json::from_str(&json)?;
                self.index.write().await.insert(id.to_string(), value.clone());
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("read entity"),
        }
    }

    /// Removes the entity at `id`. No error if it was already absent.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.index.write().await.remove(id);
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("delete entity"),
        }
    }

    /// Lists all known entity IDs, ascending.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("read store dir"),
        };
        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use covey_tools::SubAgentRunState;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    runs: Vec<SubAgentRunState>,
}

/// Persistence for sub-agent run state.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Load all persisted runs.  Missing or unreadable data is an empty
    /// list — the coordinator treats missing as empty.
    async fn load(&self) -> Vec<SubAgentRunState>;

    async fn save(&self, runs: &[SubAgentRunState]) -> anyhow::Result<()>;
}

/// JSON-file store with atomic writes.
///
/// Writes go to `<path>.tmp` and are renamed into place, serialized behind
/// a mutex so snapshots never interleave even when multiple runs finish at
/// once.
pub struct FileRunStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn load(&self) -> Vec<SubAgentRunState> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<StoreSnapshot>(&text) {
            Ok(snapshot) => snapshot.runs,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "run store unreadable; starting empty");
                Vec::new()
            }
        }
    }

    async fn save(&self, runs: &[SubAgentRunState]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = StoreSnapshot {
            version: STORE_VERSION,
            runs: runs.to_vec(),
        };
        let text = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: std::sync::Mutex<Vec<SubAgentRunState>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn load(&self) -> Vec<SubAgentRunState> {
        self.runs.lock().expect("store lock poisoned").clone()
    }

    async fn save(&self, runs: &[SubAgentRunState]) -> anyhow::Result<()> {
        *self.runs.lock().expect("store lock poisoned") = runs.to_vec();
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use covey_tools::RunStatus;

    fn run(id: &str, status: RunStatus) -> SubAgentRunState {
        let mut r = SubAgentRunState::rejected("a", "Agent", "task", "seed");
        r.run_id = id.into();
        r.status = status;
        r.error = None;
        r
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path().join("runs.json"));
        let runs = vec![run("r1", RunStatus::Completed), run("r2", RunStatus::Failed)];
        store.save(&runs).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].run_id, "r1");
        assert_eq!(loaded[1].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let store = FileRunStore::new(&path);
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn save_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        let store = FileRunStore::new(&path);
        store.save(&[run("r1", RunStatus::Queued)]).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn snapshot_carries_version_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        let store = FileRunStore::new(&path);
        store.save(&[]).await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["version"], 1);
        assert!(v["runs"].is_array());
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryRunStore::new();
        store.save(&[run("m1", RunStatus::Running)]).await.unwrap();
        let loaded = store.load().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].run_id, "m1");
    }
}

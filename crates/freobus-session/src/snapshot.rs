//! Session snapshot cache
//!
//! Opportunistic copy of the context's session so a reloaded context can pick
//! up where it left off. The snapshot is advisory: it is only trusted when the
//! session it holds is still live.

use async_trait::async_trait;
use freobus_core::{FreobusError, FreobusResult, Origin, UnifiedSession};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Persisted view of a context's session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Active session at save time
    pub current_session: Option<UnifiedSession>,
    /// Attached origins at save time
    #[serde(rename = "connectedDApps", default)]
    pub connected_dapps: Vec<Origin>,
    /// Opaque wallet-side state carried alongside the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_state: Option<Value>,
}

/// Where snapshots live
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Last saved snapshot, if any
    async fn load(&self) -> FreobusResult<Option<SessionSnapshot>>;

    /// Replace the saved snapshot
    async fn save(&self, snapshot: &SessionSnapshot) -> FreobusResult<()>;

    /// Forget the saved snapshot
    async fn clear(&self) -> FreobusResult<()>;
}

/// Snapshot held in memory; survives manager rebuilds within one process
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<SessionSnapshot>>,
}

impl MemorySnapshotStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `snapshot`
    pub fn with_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
        }
    }

    /// Current contents
    pub fn peek(&self) -> Option<SessionSnapshot> {
        self.slot.lock().clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> FreobusResult<Option<SessionSnapshot>> {
        Ok(self.slot.lock().clone())
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> FreobusResult<()> {
        *self.slot.lock() = Some(snapshot.clone());
        Ok(())
    }

    async fn clear(&self) -> FreobusResult<()> {
        self.slot.lock().take();
        Ok(())
    }
}

/// JSON snapshot file, replaced atomically on save
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    /// Snapshot stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> FreobusResult<Option<SessionSnapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> FreobusResult<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path).await.map_err(|e| {
            FreobusError::storage(format!("failed to create {}: {e}", temp_path.display()))
        })?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            FreobusError::storage(format!("failed to replace {}: {e}", self.path.display()))
        })
    }

    async fn clear(&self) -> FreobusResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

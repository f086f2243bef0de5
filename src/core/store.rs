//! Persistent bundle store
//!
//! Holds the current bundle under one fixed key plus the sync state record.
//! Reads never fail: a missing, unreadable or corrupt document is a miss, so a
//! caller can always fall through to a fresh fetch.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::bundle::Bundle;
use crate::core::error::Result;

/// Key of the single current bundle
pub const BUNDLE_KEY: &str = "graph-state";

/// Key of the persisted [`SyncState`]
pub const SYNC_STATE_KEY: &str = "sync-state";

/// Scalar state the sync gate carries between boots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Time of the last successful manifest check
    pub last_checked: Option<DateTime<Utc>>,
}

/// Durable storage for the current bundle and the sync state
pub trait BundleStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Option<Bundle>> + Send;

    fn set(&self, key: &str, bundle: &Bundle) -> impl Future<Output = Result<()>> + Send;

    fn get_sync_state(&self) -> impl Future<Output = SyncState> + Send;

    fn set_sync_state(&self, state: &SyncState) -> impl Future<Output = Result<()>> + Send;
}

/// Store keeping one JSON document per key in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No stored entry at {}", path.display());
                return None;
            }
            Err(e) => {
                warn!("Store unavailable ({}): {e}", path.display());
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring corrupt store entry {}: {e}", path.display());
                None
            }
        }
    }

    /// Write through a temp file and rename so readers never see a partial entry
    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec(value)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }
}

impl BundleStore for FileStore {
    async fn get(&self, key: &str) -> Option<Bundle> {
        self.read(key).await
    }

    async fn set(&self, key: &str, bundle: &Bundle) -> Result<()> {
        self.write(key, bundle).await
    }

    async fn get_sync_state(&self) -> SyncState {
        self.read(SYNC_STATE_KEY).await.unwrap_or_default()
    }

    async fn set_sync_state(&self, state: &SyncState) -> Result<()> {
        self.write(SYNC_STATE_KEY, state).await
    }
}

/// In-process store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    bundles: Mutex<HashMap<String, Bundle>>,
    state: Mutex<SyncState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BundleStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Bundle> {
        self.bundles.lock().ok()?.get(key).cloned()
    }

    async fn set(&self, key: &str, bundle: &Bundle) -> Result<()> {
        if let Ok(mut bundles) = self.bundles.lock() {
            bundles.insert(key.to_string(), bundle.clone());
        }
        Ok(())
    }

    async fn get_sync_state(&self) -> SyncState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    async fn set_sync_state(&self, state: &SyncState) -> Result<()> {
        if let Ok(mut current) = self.state.lock() {
            *current = state.clone();
        }
        Ok(())
    }
}

impl<S: BundleStore> BundleStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> impl Future<Output = Option<Bundle>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, bundle: &Bundle) -> impl Future<Output = Result<()>> + Send {
        (**self).set(key, bundle)
    }

    fn get_sync_state(&self) -> impl Future<Output = SyncState> + Send {
        (**self).get_sync_state()
    }

    fn set_sync_state(&self, state: &SyncState) -> impl Future<Output = Result<()>> + Send {
        (**self).set_sync_state(state)
    }
}

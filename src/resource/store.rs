//! Stores for desired configuration and last known state, keyed by
//! resource address (e.g. `bigipnext_cm_waf_policy.main`).

use crate::resource::model::{DesiredConfig, ObservedState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access state file '{path}': {message}")]
    Io { path: String, message: String },

    #[error("State file '{path}' is corrupt: {message}")]
    Corrupt { path: String, message: String },

    #[error("Unsupported state file version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn desired(&self, address: &str) -> Result<Option<DesiredConfig>, StoreError>;

    async fn observed(&self, address: &str) -> Result<Option<ObservedState>, StoreError>;

    async fn set_observed(&self, address: &str, state: ObservedState) -> Result<(), StoreError>;
}

/// In-process store, mostly for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    desired: RwLock<HashMap<String, DesiredConfig>>,
    observed: RwLock<HashMap<String, ObservedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_desired(&self, address: &str, desired: DesiredConfig) {
        self.desired.write().await.insert(address.to_string(), desired);
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn desired(&self, address: &str) -> Result<Option<DesiredConfig>, StoreError> {
        Ok(self.desired.read().await.get(address).cloned())
    }

    async fn observed(&self, address: &str) -> Result<Option<ObservedState>, StoreError> {
        Ok(self.observed.read().await.get(address).cloned())
    }

    async fn set_observed(&self, address: &str, state: ObservedState) -> Result<(), StoreError> {
        self.observed.write().await.insert(address.to_string(), state);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    resources: BTreeMap<String, ObservedState>,
}

/// Observed state persisted as a JSON file; desired configuration is
/// staged in memory by the caller (usually read from a config file).
pub struct JsonFileStore {
    path: PathBuf,
    desired: RwLock<HashMap<String, DesiredConfig>>,
    // serialises read-modify-write cycles on the file
    lock: RwLock<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            desired: RwLock::new(HashMap::new()),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn stage(&self, address: &str, desired: DesiredConfig) {
        self.desired.write().await.insert(address.to_string(), desired);
    }

    /// All addresses with a live identity
    pub async fn addresses(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.read().await;
        Ok(self.load().await?.resources.into_keys().collect())
    }

    fn io_error(&self, e: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
    }

    async fn load(&self) -> Result<StateFile, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StateFile {
                    version: STATE_FORMAT_VERSION,
                    resources: BTreeMap::new(),
                })
            }
            Err(e) => return Err(self.io_error(e)),
        };
        let state: StateFile = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        if state.version != STATE_FORMAT_VERSION {
            return Err(StoreError::Version {
                found: state.version,
                expected: STATE_FORMAT_VERSION,
            });
        }
        Ok(state)
    }

    async fn save(&self, state: &StateFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let content = serde_json::to_string_pretty(state).map_err(|e| StoreError::Corrupt {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        // write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        debug!("Saved {} resources to {}", state.resources.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn desired(&self, address: &str) -> Result<Option<DesiredConfig>, StoreError> {
        Ok(self.desired.read().await.get(address).cloned())
    }

    async fn observed(&self, address: &str) -> Result<Option<ObservedState>, StoreError> {
        let _guard = self.lock.read().await;
        Ok(self.load().await?.resources.remove(address))
    }

    async fn set_observed(&self, address: &str, state: ObservedState) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut file = self.load().await?;
        if state.is_present() {
            file.resources.insert(address.to_string(), state);
        } else {
            // a cleared identity means the resource is gone
            file.resources.remove(address);
        }
        self.save(&file).await
    }
}

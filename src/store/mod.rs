//! Local state persistence
//!
//! Small JSON documents under one data directory. Writes go to a temp file
//! next to the target and are renamed over it, so a crash mid-write leaves the
//! previous version intact.
//!
//! None of this is a ledger of record: every document can be rebuilt from the
//! live balance source.

pub mod token_lists;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub use token_lists::{ListKind, TokenLists};

/// Keyed JSON document store
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key like `holders/ODINDOG` to `<root>/holders/ODINDOG.json`
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..");
        if !valid {
            return Err(Error::Persistence(format!("Invalid store key: {:?}", key)));
        }
        Ok(self.root.join(format!("{}.json", key)))
    }

    /// Load a document; `Ok(None)` if it was never written
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key)?;
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let value = serde_json::from_str(&data).map_err(|e| {
            Error::Persistence(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Some(value))
    }

    /// Load a document, falling back to `T::default()` when missing or unreadable
    pub async fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.load(key).await {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable state, starting empty");
                T::default()
            }
        }
    }

    /// Atomically replace a document
    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Persistence(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::Persistence(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await.map_err(|e| {
            Error::Persistence(format!("Failed to write {}: {}", tmp.display(), e))
        })?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Persistence(format!(
                "Failed to replace {}: {}",
                path.display(),
                e
            )));
        }

        debug!(key = %key, bytes = data.len(), "Saved state");
        Ok(())
    }

    /// Save, logging instead of failing
    ///
    /// In-memory state stays authoritative for this process; only durability
    /// of this update is lost.
    pub async fn save_logged<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match self.save(key, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "State not persisted");
                false
            }
        }
    }
}

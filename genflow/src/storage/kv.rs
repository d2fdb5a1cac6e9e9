//! Durable async key-value storage.

use crate::errors::GenflowError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Protocol for the key-value backend beneath the checkpoint and
/// generation-state stores.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Gets a value by key.
    async fn get(&self, key: &str) -> Result<Option<String>, GenflowError>;

    /// Sets a value, replacing any previous one.
    async fn set(&self, key: &str, value: String) -> Result<(), GenflowError>;

    /// Deletes a value. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), GenflowError>;

    /// Lists every stored key.
    async fn list_keys(&self) -> Result<Vec<String>, GenflowError>;
}

/// In-memory key-value store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryKeyValueStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GenflowError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), GenflowError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), GenflowError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, GenflowError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

const FILE_EXTENSION: &str = "json";

/// Key-value store keeping one file per key under a root directory.
///
/// File names are the hex-encoded key, so any key is a valid name. Writes
/// go to a temporary sibling first and are renamed into place, so a crash
/// mid-write leaves either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, GenflowError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{FILE_EXTENSION}", hex::encode(key.as_bytes())))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GenflowError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GenflowError::Storage(format!("read '{key}': {e}"))),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), GenflowError> {
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{FILE_EXTENSION}.tmp"));
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| GenflowError::Storage(format!("write '{key}': {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| GenflowError::Storage(format!("commit '{key}': {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), GenflowError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GenflowError::Storage(format!("delete '{key}': {e}"))),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, GenflowError> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(key) = hex::decode(stem).ok().and_then(|b| String::from_utf8(b).ok()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

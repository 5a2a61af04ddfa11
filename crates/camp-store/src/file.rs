//! JSON-file store with atomic write-through.
//!
//! The whole map lives in memory; each `set`/`remove` rewrites the file via
//! temp + rename so a crash never leaves a half-written credential file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::KeyValueStore;

pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Value>>,
}

impl FileStore {
    /// Load or create a store at `path`. A missing file starts empty.
    pub async fn open(path: &Path) -> Result<Self> {
        let entries = match tokio::fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => HashMap::new(),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("parsing store: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading store: {}", path.display()))
            }
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened file store");

        Ok(FileStore {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &HashMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating store dir: {}", parent.display()))?;
            }
        }

        let json = serde_json::to_string_pretty(entries).context("serializing store")?;

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .with_context(|| format!("writing store temp: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("renaming store: {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }
}

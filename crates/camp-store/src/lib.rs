//! camp-store: durable key-value storage for credentials and cached keys
//!
//! Two backends:
//!   - **Memory**: process-local map, used by tests and ephemeral sessions.
//!   - **JSON file**: whole map loaded on open, written through atomically
//!     (temp file + rename) on every mutation.
//!
//! Both implement [`KeyValueStore`]. Values are JSON so records can be
//! stored as objects and plain tokens as strings.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Persistent key-value store. Every call is a suspension point.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value; `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    /// Insert or replace a value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    /// Delete a value. Deleting an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Typed helpers over any [`KeyValueStore`]
#[async_trait]
pub trait StoreExt: KeyValueStore {
    /// Fetch and deserialize. A JSON string holding a serialized object is
    /// accepted as well as the object itself.
    async fn get_typed<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };
        let value = match value {
            Value::String(s) if s.trim_start().starts_with('{') => {
                serde_json::from_str(&s).with_context(|| format!("parsing stored '{key}'"))?
            }
            other => other,
        };
        let typed = serde_json::from_value(value).with_context(|| format!("decoding stored '{key}'"))?;
        Ok(Some(typed))
    }

    async fn set_typed<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).with_context(|| format!("encoding '{key}'"))?;
        self.set(key, value).await
    }

    /// Fetch a plain string value.
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key).await? {
            Some(Value::String(s)) if !s.is_empty() => Ok(Some(s)),
            Some(Value::String(_)) | Some(Value::Null) | None => Ok(None),
            Some(other) => anyhow::bail!("stored '{key}' is not a string: {other}"),
        }
    }
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {}

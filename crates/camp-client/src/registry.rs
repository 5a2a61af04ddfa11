//! Latest-wins tracking of in-flight calls per `METHOD:path` key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use camp_core::types::Method;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Entries {
    by_key: HashMap<String, (u64, CancellationToken)>,
}

#[derive(Debug, Default, Clone)]
pub struct InFlightRegistry {
    entries: Arc<Mutex<Entries>>,
    next_id: Arc<AtomicU64>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(method: Method, path: &str) -> String {
        format!("{method}:{path}")
    }

    /// Register a new call under `key`, cancelling whichever call held it.
    pub fn register(&self, key: String) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self
            .lock()
            .by_key
            .insert(key.clone(), (id, token.clone()));
        if let Some((old_id, old_token)) = previous {
            tracing::debug!(%key, superseded = old_id, by = id, "cancelling superseded call");
            old_token.cancel();
        }
        Registration {
            registry: self.clone(),
            key,
            id,
            token,
        }
    }

    /// Number of keys with a live call
    pub fn len(&self) -> usize {
        self.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().by_key.contains_key(key)
    }

    fn release(&self, key: &str, id: u64) {
        let mut entries = self.lock();
        if matches!(entries.by_key.get(key), Some((current, _)) if *current == id) {
            entries.by_key.remove(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A call's slot in the registry. Dropping it removes the entry only if no
/// newer call has taken the key since.
#[derive(Debug)]
pub struct Registration {
    registry: InFlightRegistry,
    key: String,
    id: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_superseded(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_registration_cancels_older() {
        let registry = InFlightRegistry::new();
        let key = InFlightRegistry::key(Method::Get, "/x");
        assert_eq!(key, "GET:/x");

        let a = registry.register(key.clone());
        let b = registry.register(key.clone());

        assert!(a.is_superseded());
        assert!(!b.is_superseded());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_drop_keeps_newer_entry() {
        let registry = InFlightRegistry::new();
        let a = registry.register("GET:/x".into());
        let b = registry.register("GET:/x".into());

        drop(a);
        assert!(registry.contains("GET:/x"));

        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn keys_are_independent() {
        let registry = InFlightRegistry::new();
        let get = registry.register(InFlightRegistry::key(Method::Get, "/x"));
        let post = registry.register(InFlightRegistry::key(Method::Post, "/x"));
        assert!(!get.is_superseded());
        assert!(!post.is_superseded());
        assert_eq!(registry.len(), 2);
    }
}

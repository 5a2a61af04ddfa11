//! Server public key cache with TTL.
//!
//! The key is fetched from the key-exchange endpoint, whose payload is
//! AES-CBC encrypted under the fixed application key. A failed exchange is
//! fatal: nothing can be encrypted without it, and there is no plaintext
//! fallback.

use std::sync::{Arc, Mutex, PoisonError};

use base64::{engine::general_purpose::STANDARD, Engine};
use camp_core::config::KeysConfig;
use camp_core::types::{codes, KeyExchangePayload, ServerPublicKeyRecord, SERVER_PUBLIC_KEY};
use camp_core::{CampError, CampResult, Clock};
use camp_store::{KeyValueStore, StoreExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::platform::{Notice, Notifier};
use crate::singleflight::SingleFlight;
use crate::wire::WireClient;

const RESTART_HINT: &str =
    "Initialisation failed. Please close and re-open the app to continue.";

#[derive(Clone)]
pub struct ServerKeyCache {
    inner: Arc<Inner>,
}

struct Inner {
    wire: Arc<WireClient>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    exchange_path: String,
    default_ttl_secs: u64,
    app_key: Zeroizing<Vec<u8>>,
    cached: Mutex<Option<ServerPublicKeyRecord>>,
    fetching: SingleFlight<String>,
}

impl ServerKeyCache {
    pub fn new(
        wire: Arc<WireClient>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        config: &KeysConfig,
    ) -> CampResult<Self> {
        let app_key = Zeroizing::new(
            STANDARD
                .decode(config.app_key.trim())
                .map_err(|e| CampError::Config(format!("keys.app_key is not base64: {e}")))?,
        );
        if !matches!(app_key.len(), 16 | 24 | 32) {
            return Err(CampError::Config(format!(
                "keys.app_key must decode to 16, 24 or 32 bytes, got {}",
                app_key.len()
            )));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                wire,
                store,
                clock,
                notifier,
                exchange_path: config.exchange_path.clone(),
                default_ttl_secs: config.default_ttl_secs,
                app_key,
                cached: Mutex::new(None),
                fetching: SingleFlight::new(),
            }),
        })
    }

    /// The server public key (PEM or bare base64), fetching it if the cached
    /// copy is missing or past its TTL.
    pub async fn get_server_public_key(&self) -> CampResult<String> {
        let now = self.inner.clock.now_ms();
        let cached = self.inner.lock_cached().clone();
        if let Some(record) = cached.filter(|r| r.is_valid_at(now)) {
            return Ok(record.value);
        }

        match self
            .inner
            .store
            .get_typed::<ServerPublicKeyRecord>(SERVER_PUBLIC_KEY)
            .await
        {
            Ok(Some(record)) if record.is_valid_at(self.inner.clock.now_ms()) => {
                debug!("server public key promoted from store");
                let value = record.value.clone();
                *self.inner.lock_cached() = Some(record);
                return Ok(value);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %format!("{e:#}"), "stored server public key unreadable"),
        }

        let inner = Arc::clone(&self.inner);
        self.inner.fetching.run(move || inner.exchange()).await
    }

    /// Forget `rejected` from memory and the store so the next lookup
    /// exchanges a fresh key. A newer key cached in the meantime is kept.
    pub async fn invalidate(&self, rejected: &str) {
        {
            let mut cached = self.inner.lock_cached();
            if cached.as_ref().is_some_and(|r| r.value == rejected) {
                *cached = None;
            }
        }
        let stored = self
            .inner
            .store
            .get_typed::<ServerPublicKeyRecord>(SERVER_PUBLIC_KEY)
            .await;
        if let Ok(Some(record)) = stored {
            if record.value != rejected {
                return;
            }
        }
        match self.inner.store.remove(SERVER_PUBLIC_KEY).await {
            Ok(()) => warn!("unusable server public key discarded"),
            Err(e) => warn!(error = %format!("{e:#}"), "failed to discard server public key"),
        }
    }

    /// The memory-cached record, valid or not.
    pub fn cached(&self) -> Option<ServerPublicKeyRecord> {
        self.inner.lock_cached().clone()
    }
}

impl Inner {
    fn lock_cached(&self) -> std::sync::MutexGuard<'_, Option<ServerPublicKeyRecord>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn exchange(self: Arc<Self>) -> CampResult<String> {
        match self.fetch().await {
            Ok(record) => {
                info!(expires_at = record.expires_at, "server public key exchanged");
                let value = record.value.clone();
                *self.lock_cached() = Some(record.clone());
                if let Err(e) = self.store.set_typed(SERVER_PUBLIC_KEY, &record).await {
                    warn!(error = %format!("{e:#}"), "failed to persist server public key");
                }
                Ok(value)
            }
            Err(e) => {
                tracing::error!(error = %e, "key exchange failed");
                self.notifier.notify(Notice::Fatal {
                    message: RESTART_HINT.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> CampResult<ServerPublicKeyRecord> {
        // random id keeps intermediaries from serving a cached exchange
        let nonce: u64 = rand::random();
        let envelope = self
            .wire
            .get(&self.exchange_path, json!({ "id": nonce.to_string() }))
            .await
            .map_err(|e| CampError::KeyExchange(e.to_string()))?;

        if envelope.code != codes::SUCCESS {
            return Err(CampError::KeyExchange(format!(
                "server returned code {}: {}",
                envelope.code, envelope.msg
            )));
        }

        let ciphertext = match envelope.data {
            Value::String(s) => s,
            Value::Null => return Err(CampError::KeyExchange("empty payload".into())),
            other => other.to_string(),
        };
        let decrypted = camp_crypto::decrypt(&ciphertext, &self.app_key, None, false)
            .map_err(|e| CampError::KeyExchange(format!("{e:#}")))?;
        let payload: KeyExchangePayload = serde_json::from_value(decrypted)
            .map_err(|e| CampError::KeyExchange(format!("unexpected payload: {e}")))?;
        if payload.public_key.trim().is_empty() {
            return Err(CampError::KeyExchange("payload has no public key".into()));
        }

        let ttl_secs = payload
            .expire_time
            .filter(|t| *t > 0)
            .unwrap_or(self.default_ttl_secs);
        Ok(ServerPublicKeyRecord {
            value: payload.public_key,
            expires_at: self
                .clock
                .now_ms()
                .saturating_add(ttl_secs.saturating_mul(1000)),
        })
    }
}

//! Access credential lifecycle.
//!
//! Lookup order is memory, then the persistent store, then the network.
//! Network paths are single-flighted per kind:
//!
//! ```text
//! Absent ──authenticate──▶ Valid ──time──▶ Expired ──refresh──▶ Valid
//!                                                      │
//!                                                   (failure)
//!                                                      ▼
//!                                               Authenticating ──▶ Valid
//! ```
//!
//! The refresh token is never cached in memory; it is read from the store
//! when a refresh starts and replaced on every issuance.

use std::sync::{Arc, Mutex, PoisonError};

use camp_core::config::AuthConfig;
use camp_core::types::{codes, AccessCredential, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use camp_core::{CampError, CampResult, Clock};
use camp_store::{KeyValueStore, StoreExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::platform::PlatformLogin;
use crate::singleflight::SingleFlight;
use crate::wire::WireClient;

/// Credentials issued by the login and refresh endpoints
pub struct TokenGrant {
    pub access_token: String,
    /// Server-declared lifetime in seconds
    pub expires_in: u64,
    pub refresh_token: SecretString,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGrant {
    access_token: String,
    expires_in: u64,
    refresh_token: String,
}

impl TryFrom<Value> for TokenGrant {
    type Error = CampError;

    fn try_from(data: Value) -> CampResult<Self> {
        let raw: RawGrant = serde_json::from_value(data)
            .map_err(|e| CampError::Auth(format!("malformed token grant: {e}")))?;
        if raw.access_token.is_empty() || raw.refresh_token.is_empty() {
            return Err(CampError::Auth("token grant is missing a token".into()));
        }
        Ok(TokenGrant {
            access_token: raw.access_token,
            expires_in: raw.expires_in,
            refresh_token: SecretString::from(raw.refresh_token),
        })
    }
}

#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

struct Inner {
    wire: Arc<WireClient>,
    login: Arc<dyn PlatformLogin>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    cached: Mutex<Option<AccessCredential>>,
    refreshing: SingleFlight<String>,
    authenticating: SingleFlight<String>,
}

impl CredentialManager {
    pub fn new(
        wire: Arc<WireClient>,
        login: Arc<dyn PlatformLogin>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                wire,
                login,
                store,
                clock,
                config,
                cached: Mutex::new(None),
                refreshing: SingleFlight::new(),
                authenticating: SingleFlight::new(),
            }),
        }
    }

    /// A currently valid access token, renewing it if needed.
    pub async fn get_access_credential(&self) -> CampResult<String> {
        if let Some(token) = self.inner.cached_token() {
            return Ok(token);
        }

        match self
            .inner
            .store
            .get_typed::<AccessCredential>(ACCESS_TOKEN_KEY)
            .await
        {
            Ok(Some(stored)) if stored.is_valid_at(self.inner.clock.now_ms()) => {
                debug!("access credential promoted from store");
                let token = stored.token.clone();
                *self.inner.lock_cached() = Some(stored);
                return Ok(token);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %format!("{e:#}"), "stored access credential unreadable"),
        }

        self.refresh().await
    }

    /// Exchange the refresh token for a new grant; falls back to
    /// [`authenticate`](Self::authenticate) when there is none or it fails.
    pub async fn refresh(&self) -> CampResult<String> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .refreshing
            .run(move || inner.refresh_flow())
            .await
    }

    /// Run the platform login handshake for a fresh grant.
    pub async fn authenticate(&self) -> CampResult<String> {
        Arc::clone(&self.inner).authenticate().await
    }

    /// Forget every credential, in memory and in the store.
    pub async fn clear(&self) -> CampResult<()> {
        *self.inner.lock_cached() = None;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            self.inner
                .store
                .remove(key)
                .await
                .map_err(|e| CampError::Store(format!("removing '{key}': {e:#}")))?;
        }
        info!("credentials cleared");
        Ok(())
    }

    /// The memory-cached credential, valid or not.
    pub fn cached(&self) -> Option<AccessCredential> {
        self.inner.lock_cached().clone()
    }
}

impl Inner {
    fn lock_cached(&self) -> std::sync::MutexGuard<'_, Option<AccessCredential>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached_token(&self) -> Option<String> {
        let now = self.clock.now_ms();
        self.lock_cached()
            .as_ref()
            .filter(|c| c.is_valid_at(now))
            .map(|c| c.token.clone())
    }

    async fn authenticate(self: Arc<Self>) -> CampResult<String> {
        let this = Arc::clone(&self);
        self.authenticating.run(move || this.login_flow()).await
    }

    async fn refresh_flow(self: Arc<Self>) -> CampResult<String> {
        let refresh_token = match self.store.get_string(REFRESH_TOKEN_KEY).await {
            Ok(Some(token)) => SecretString::from(token),
            Ok(None) => {
                debug!("no refresh token stored, authenticating");
                return self.authenticate().await;
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "stored refresh token unreadable, authenticating");
                return self.authenticate().await;
            }
        };

        let mut query = json!({ "refreshToken": refresh_token.expose_secret() });
        self.add_source(&mut query);

        match self.request_grant(&self.config.refresh_path, query).await {
            Ok(grant) => {
                info!("access credential refreshed");
                Ok(self.install(grant).await)
            }
            Err(e) => {
                warn!(error = %e, "refresh failed, discarding credentials and re-authenticating");
                self.discard().await;
                self.authenticate().await
            }
        }
    }

    async fn login_flow(self: Arc<Self>) -> CampResult<String> {
        let result: CampResult<TokenGrant> = async {
            let code = self.login.login().await?;
            let mut query = json!({ "code": code.expose_secret() });
            self.add_source(&mut query);
            self.request_grant(&self.config.login_path, query).await
        }
        .await;

        match result {
            Ok(grant) => {
                info!("authenticated");
                Ok(self.install(grant).await)
            }
            Err(e) => {
                warn!(error = %e, "authentication failed");
                *self.lock_cached() = None;
                Err(match e {
                    CampError::Auth(_) => e,
                    other => CampError::Auth(other.to_string()),
                })
            }
        }
    }

    fn add_source(&self, query: &mut Value) {
        if let (Some(source), Some(map)) = (&self.config.source, query.as_object_mut()) {
            map.insert("source".into(), Value::String(source.clone()));
        }
    }

    async fn request_grant(&self, path: &str, query: Value) -> CampResult<TokenGrant> {
        let envelope = self.wire.get(path, query).await?;
        if envelope.code != codes::SUCCESS {
            return Err(CampError::Auth(format!(
                "{path} returned code {}: {}",
                envelope.code, envelope.msg
            )));
        }
        TokenGrant::try_from(envelope.data)
    }

    /// Cache and persist a grant, returning the new access token.
    async fn install(&self, grant: TokenGrant) -> String {
        let lifetime_ms = grant
            .expires_in
            .saturating_sub(self.config.expiry_skew_secs)
            .saturating_mul(1000);
        let credential = AccessCredential {
            token: grant.access_token,
            expires_at: self.clock.now_ms().saturating_add(lifetime_ms),
        };
        *self.lock_cached() = Some(credential.clone());

        if let Err(e) = self.store.set_typed(ACCESS_TOKEN_KEY, &credential).await {
            warn!(error = %format!("{e:#}"), "failed to persist access credential");
        }
        let refresh = Value::String(grant.refresh_token.expose_secret().to_string());
        if let Err(e) = self.store.set(REFRESH_TOKEN_KEY, refresh).await {
            warn!(error = %format!("{e:#}"), "failed to persist refresh token");
        }
        credential.token
    }

    async fn discard(&self) {
        *self.lock_cached() = None;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.store.remove(key).await {
                warn!(key, error = %format!("{e:#}"), "failed to remove stored credential");
            }
        }
    }
}

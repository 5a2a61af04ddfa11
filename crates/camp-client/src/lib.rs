//! camp-client: the campspot secure request pipeline
//!
//! ```text
//! caller ─▶ Dispatcher ─▶ CredentialManager ─┐
//!              │        ─▶ ServerKeyCache ───┤─▶ WireClient ─▶ Transport
//!              └── encrypt / wrap / decrypt ─┘
//! ```
//!
//! All shared state (credential cache, key cache, in-flight registry,
//! single-flight slots) lives in one [`Pipeline`] value. Build one per
//! process; tests build as many as they like.

pub mod credentials;
pub mod dispatcher;
pub mod http;
pub mod keepalive;
pub mod platform;
pub mod registry;
pub mod server_key;
pub mod singleflight;
pub mod wire;

pub use credentials::{CredentialManager, TokenGrant};
pub use dispatcher::{ApiRequest, CallOutcome, Dispatcher};
pub use http::HttpTransport;
pub use platform::{
    Headers, HttpRequest, HttpResponse, Notice, Notifier, PlatformLogin, TracingNotifier,
    Transport,
};
pub use server_key::ServerKeyCache;

use std::sync::Arc;
use std::time::Duration;

use camp_core::config::CampConfig;
use camp_core::{CampResult, Clock};
use camp_store::KeyValueStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::wire::WireClient;

/// Platform capabilities the pipeline runs on
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub login: Arc<dyn PlatformLogin>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct Pipeline {
    dispatcher: Dispatcher,
    credentials: CredentialManager,
    server_keys: ServerKeyCache,
    keepalive_interval: Duration,
}

impl Pipeline {
    pub fn new(config: &CampConfig, deps: Collaborators) -> CampResult<Self> {
        let wire = Arc::new(WireClient::new(deps.transport, &config.api));
        let credentials = CredentialManager::new(
            Arc::clone(&wire),
            deps.login,
            Arc::clone(&deps.store),
            Arc::clone(&deps.clock),
            config.auth.clone(),
        );
        let server_keys = ServerKeyCache::new(
            Arc::clone(&wire),
            deps.store,
            deps.clock,
            Arc::clone(&deps.notifier),
            &config.keys,
        )?;
        let dispatcher = Dispatcher::new(
            wire,
            credentials.clone(),
            server_keys.clone(),
            deps.notifier,
        );

        Ok(Self {
            dispatcher,
            credentials,
            server_keys,
            keepalive_interval: Duration::from_secs(config.auth.keepalive_interval_secs.max(1)),
        })
    }

    pub async fn call(&self, request: ApiRequest) -> CampResult<CallOutcome> {
        self.dispatcher.call(request).await
    }

    pub async fn call_plain(&self, request: ApiRequest) -> CampResult<CallOutcome> {
        self.dispatcher.call_plain(request).await
    }

    /// Fetch the server public key ahead of the first call.
    pub async fn warm_up(&self) -> CampResult<()> {
        self.server_keys.get_server_public_key().await.map(|_| ())
    }

    /// Start the background keepalive task; it stops when `cancel` fires.
    pub fn spawn_keepalive(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(keepalive::run_keepalive(
            self.credentials.clone(),
            self.keepalive_interval,
            cancel,
        ))
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn server_keys(&self) -> &ServerKeyCache {
        &self.server_keys
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

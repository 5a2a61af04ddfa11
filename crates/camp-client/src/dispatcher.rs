//! Encrypted request dispatch.
//!
//! Each call registers under `METHOD:path` before doing anything else, so a
//! later call to the same endpoint always supersedes an earlier one. The
//! attempt loop then runs against the registration's cancellation token:
//!
//! ```text
//! server key ─▶ token ─▶ fresh SessionKey ─▶ encrypt body + wrap key ─▶ send
//!   code 0   → decrypt with this attempt's key
//!   code 401 → refresh, retry once
//!   code 400 → authenticate, retry once
//!   other    → notify, fail
//! ```

use std::sync::Arc;

use camp_core::types::{codes, ApiResponse, Method, ResponseEnvelope};
use camp_core::{CampError, CampResult};
use camp_crypto::{decrypt, encrypt_json, generate_session_key, wrap_session_key, SessionKey};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::credentials::CredentialManager;
use crate::platform::{Headers, Notice, Notifier};
use crate::registry::{InFlightRegistry, Registration};
use crate::server_key::ServerKeyCache;
use crate::wire::WireClient;

/// One API call as issued by a caller
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub headers: Headers,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Headers::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// How a call ended when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Completed(ApiResponse),
    /// A newer call to the same endpoint replaced this one
    Superseded,
}

impl CallOutcome {
    pub fn into_response(self) -> Option<ApiResponse> {
        match self {
            CallOutcome::Completed(response) => Some(response),
            CallOutcome::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, CallOutcome::Superseded)
    }
}

#[derive(Debug, Clone, Copy)]
enum Attempt {
    First,
    Retried,
}

pub struct Dispatcher {
    wire: Arc<WireClient>,
    credentials: CredentialManager,
    keys: ServerKeyCache,
    notifier: Arc<dyn Notifier>,
    registry: InFlightRegistry,
}

impl Dispatcher {
    pub fn new(
        wire: Arc<WireClient>,
        credentials: CredentialManager,
        keys: ServerKeyCache,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            wire,
            credentials,
            keys,
            notifier,
            registry: InFlightRegistry::new(),
        }
    }

    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    /// Send `request` through the encrypted envelope.
    pub async fn call(&self, request: ApiRequest) -> CampResult<CallOutcome> {
        let registration = self
            .registry
            .register(InFlightRegistry::key(request.method, &request.path));
        supervise(registration, self.execute(&request)).await
    }

    /// Send `request` without the envelope or credentials, under the same
    /// latest-wins rule. The server's envelope is returned untouched.
    pub async fn call_plain(&self, request: ApiRequest) -> CampResult<CallOutcome> {
        let registration = self
            .registry
            .register(InFlightRegistry::key(request.method, &request.path));
        let send = async {
            let http = self.wire.request(
                request.method,
                &request.path,
                request.body.clone(),
                &request.headers,
            );
            let envelope = self.wire.send(http).await?;
            Ok::<_, CampError>(ApiResponse {
                code: envelope.code,
                data: envelope.data,
                msg: envelope.msg,
            })
        };
        supervise(registration, send).await
    }

    async fn execute(&self, request: &ApiRequest) -> CampResult<ApiResponse> {
        let mut attempt = Attempt::First;
        let mut renewed: Option<String> = None;

        loop {
            // key exchange precedes login on a fresh install
            let server_key = self.keys.get_server_public_key().await?;
            let access = match renewed.take() {
                Some(token) => token,
                None => self.credentials.get_access_credential().await?,
            };
            let (envelope, session_key) = self.send_encrypted(request, &server_key, &access).await?;

            match (envelope.code, attempt) {
                (codes::SUCCESS, _) => return open(envelope, &session_key),
                (codes::ACCESS_EXPIRED, Attempt::First) => {
                    debug!(path = %request.path, "access credential expired, refreshing");
                    renewed = Some(self.credentials.refresh().await?);
                    attempt = Attempt::Retried;
                }
                (codes::SESSION_INVALID, Attempt::First) => {
                    debug!(path = %request.path, "session invalid, re-authenticating");
                    renewed = Some(self.credentials.authenticate().await?);
                    attempt = Attempt::Retried;
                }
                (code @ (codes::ACCESS_EXPIRED | codes::SESSION_INVALID), Attempt::Retried) => {
                    warn!(path = %request.path, code, "credential rejected after recovery");
                    return Err(CampError::AuthRetryExhausted {
                        code,
                        msg: envelope.msg,
                    });
                }
                (code, _) => {
                    self.notifier.notify(Notice::Api {
                        code,
                        msg: envelope.msg.clone(),
                    });
                    return Err(CampError::Api {
                        code,
                        msg: envelope.msg,
                    });
                }
            }
        }
    }

    async fn send_encrypted(
        &self,
        request: &ApiRequest,
        server_key: &str,
        access: &str,
    ) -> CampResult<(ResponseEnvelope, SessionKey)> {
        let session_key = generate_session_key();
        let body = request.body.clone().unwrap_or(Value::Null);
        let sealed = encrypt_json(&body, session_key.as_bytes())
            .map_err(|e| CampError::Crypto(format!("{e:#}")))?;
        let wrapped = match wrap_session_key(&session_key, server_key) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                self.keys.invalidate(server_key).await;
                return Err(CampError::Crypto(format!("{e:#}")));
            }
        };

        let mut headers = Headers::new();
        headers.insert("x-client-key", wrapped);
        headers.insert("x-supports-gzip", "true");
        headers.insert("Authorization", format!("Bearer {access}"));
        headers.extend(&request.headers);

        let http = self.wire.request(
            request.method,
            &request.path,
            Some(json!({ "data": sealed.ciphertext })),
            &headers,
        );
        debug!(method = %request.method, path = %request.path, "sending encrypted request");
        let envelope = self.wire.send(http).await?;
        Ok((envelope, session_key))
    }
}

/// Race `work` against the registration's token. A cancelled call resolves
/// as [`CallOutcome::Superseded`] even if `work` finished in the same poll.
async fn supervise<F>(registration: Registration, work: F) -> CampResult<CallOutcome>
where
    F: std::future::Future<Output = CampResult<ApiResponse>>,
{
    let token = registration.token().clone();
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(key = registration.key(), "call superseded");
            Ok(CallOutcome::Superseded)
        }
        result = work => result.map(CallOutcome::Completed),
    }
}

fn open(envelope: ResponseEnvelope, key: &SessionKey) -> CampResult<ApiResponse> {
    let ciphertext = match envelope.data {
        Value::String(s) => s,
        Value::Null => {
            return Err(CampError::Decode(
                "success response carries no payload".into(),
            ))
        }
        other => other.to_string(),
    };
    let data = decrypt(&ciphertext, key.as_bytes(), None, envelope.compressed)
        .map_err(|e| CampError::Decode(format!("{e:#}")))?;
    Ok(ApiResponse {
        code: envelope.code,
        data,
        msg: envelope.msg,
    })
}

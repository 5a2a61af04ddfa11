//! Narrow interfaces to the host platform: raw network, one-time login
//! codes, and user-facing notices.

use std::collections::BTreeMap;

use async_trait::async_trait;
use camp_core::types::Method;
use camp_core::CampResult;
use secrecy::SecretString;
use serde_json::Value;

/// Header map with lower-cased names, so caller overrides replace defaults
/// regardless of spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Apply every entry of `other`, replacing existing values.
    pub fn extend(&mut self, other: &Headers) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    /// JSON body; for GET/DELETE an object body is sent as query parameters
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

/// Raw network call. Dropping the returned future aborts the request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> CampResult<HttpResponse>;
}

/// Source of one-time login codes
#[async_trait]
pub trait PlatformLogin: Send + Sync {
    async fn login(&self) -> CampResult<SecretString>;
}

/// Something the user should see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Server-reported application error, shown as a transient message
    Api { code: i64, msg: String },
    /// The pipeline cannot continue until the app is restarted
    Fatal { message: String },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Routes notices to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Api { code, msg } => tracing::warn!(code, %msg, "api error"),
            Notice::Fatal { message } => tracing::error!(%message, "fatal"),
        }
    }
}

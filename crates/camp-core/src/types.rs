use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store key holding the serialized [`AccessCredential`]
pub const ACCESS_TOKEN_KEY: &str = "access_token_info";
/// Store key holding the refresh credential (plain string)
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Store key holding the serialized [`ServerPublicKeyRecord`]
pub const SERVER_PUBLIC_KEY: &str = "S_PUBLIC_KEY";

/// Application codes recognised by the pipeline
pub mod codes {
    pub const SUCCESS: i64 = 0;
    pub const SESSION_INVALID: i64 = 400;
    pub const ACCESS_EXPIRED: i64 = 401;
}

/// HTTP method of an API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    /// Whether the platform sends request data in the query string
    pub fn uses_query(&self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(format!("unsupported method '{other}'")),
        }
    }
}

/// Short-lived bearer token plus its client-side expiry (Unix epoch millis).
///
/// `expires_at` is already shortened by the safety skew when issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCredential {
    pub token: String,
    #[serde(alias = "expireTime")]
    pub expires_at: u64,
}

impl AccessCredential {
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        !self.token.is_empty() && now_ms < self.expires_at
    }
}

/// Cached server public key used to wrap per-request keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPublicKeyRecord {
    pub value: String,
    #[serde(alias = "expireAt")]
    pub expires_at: u64,
}

impl ServerPublicKeyRecord {
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        !self.value.is_empty() && now_ms < self.expires_at
    }
}

/// Server response envelope: `{ code, data, msg, compressed? }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub code: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub msg: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub compressed: bool,
}

/// `null` reads as the type's default, same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decoded API response handed back to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub code: i64,
    pub data: Value,
    pub msg: String,
}

/// Decrypted key-exchange payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangePayload {
    pub public_key: String,
    /// Lifetime in seconds; absent means the configured default
    #[serde(default)]
    pub expire_time: Option<u64>,
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level client configuration (loaded from camp.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CampConfig {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub keys: KeysConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API origin, joined with request paths
    pub base_url: String,
    /// Value of the `platform` header sent with every request
    pub platform: String,
    /// Per-request transport timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Login endpoint taking a one-time platform code
    pub login_path: String,
    /// Refresh endpoint taking the stored refresh token
    pub refresh_path: String,
    /// Seconds subtracted from the server-declared lifetime (default: 100)
    pub expiry_skew_secs: u64,
    /// Background credential check interval (default: 300)
    pub keepalive_interval_secs: u64,
    /// Attribution channel forwarded to login/refresh (optional)
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Key-exchange endpoint
    pub exchange_path: String,
    /// Public key lifetime when the server omits one (default: 7 days)
    pub default_ttl_secs: u64,
    /// Fixed application key (base64, 32 bytes) protecting the key-exchange payload
    pub app_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file backing the persistent store
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            platform: "mp-weixin".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_path: "/api/auth/wxLogin".into(),
            refresh_path: "/api/auth/refreshToken".into(),
            expiry_skew_secs: 100,
            keepalive_interval_secs: 300,
            source: None,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            exchange_path: "/api/auth/getExchangeKey".into(),
            default_ttl_secs: 7 * 24 * 60 * 60,
            app_key: String::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/camp/store.json"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl CampConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), crate::CampError> {
        use crate::CampError;

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(CampError::Config(format!(
                "api.base_url must be an http(s) URL, got '{}'",
                self.api.base_url
            )));
        }
        if self.api.base_url.starts_with("http://") {
            tracing::warn!(
                base_url = %self.api.base_url,
                "api.base_url uses plaintext HTTP; only the payload envelope is encrypted"
            );
        }
        if self.keys.app_key.is_empty() {
            return Err(CampError::Config(
                "keys.app_key is required to read the key-exchange payload".into(),
            ));
        }
        if self.keys.default_ttl_secs == 0 {
            return Err(CampError::Config("keys.default_ttl_secs must be > 0".into()));
        }
        Ok(())
    }
}

use thiserror::Error;

pub type CampResult<T> = Result<T, CampError>;

/// Pipeline error. `Clone` because a single refresh or login outcome is
/// handed to every caller coalesced onto it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CampError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("key exchange failed: {0}")]
    KeyExchange(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("credential rejected again after recovery (code {code}): {msg}")]
    AuthRetryExhausted { code: i64, msg: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),
}

impl CampError {
    /// Returns true for errors that should be shown to the user right away
    /// rather than handled by the calling screen.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CampError::KeyExchange(_) | CampError::Config(_))
    }
}

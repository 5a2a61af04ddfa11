//! camp-crypto: per-request envelope encryption for the campspot API
//!
//! Envelope construction:
//! ```text
//! SessionKey (256-bit random, one per request attempt, zeroized on drop)
//!   ├── body:   AES-256-CBC + PKCS#7 (IV = first 16 key bytes) → base64
//!   └── header: RSA PKCS#1 v1.5 (server public key) over base64(SessionKey) → base64
//! ```
//!
//! Responses come back encrypted under the same session key, optionally as
//! base64 text of a DEFLATE/gzip stream.

pub mod asymmetric;
pub mod compress;
pub mod keys;
pub mod symmetric;

pub use asymmetric::{parse_public_key, wrap_session_key};
pub use keys::{generate_session_key, SessionKey};
pub use symmetric::{decrypt, encrypt, encrypt_json, Sealed};

/// Size of a session key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// AES block / CBC initialization vector size
pub const IV_SIZE: usize = 16;

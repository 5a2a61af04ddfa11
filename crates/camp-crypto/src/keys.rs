//! Per-request symmetric keys

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::{IV_SIZE, KEY_SIZE};

/// A per-request 256-bit AES key. Zeroized on drop, never persisted.
#[derive(Clone)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// IV used when none is supplied: the first 16 key bytes.
    pub fn derived_iv(&self) -> [u8; IV_SIZE] {
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&self.bytes[..IV_SIZE]);
        iv
    }

    /// Base64 text of the key, as wrapped into the `x-client-key` header.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.bytes))
    }

    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("session key is not valid base64: {e}"))?;
        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            anyhow::bail!("session key has wrong size: {len} bytes (expected {KEY_SIZE})");
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self::from_bytes(bytes))
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit session key from the OS-seeded thread RNG.
pub fn generate_session_key() -> SessionKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    SessionKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_generation() {
        let k1 = generate_session_key();
        let k2 = generate_session_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_base64_roundtrip() {
        let key = generate_session_key();
        let encoded = key.to_base64();
        let decoded = SessionKey::from_base64(&encoded).unwrap();
        assert_eq!(key.as_bytes(), decoded.as_bytes());
    }

    #[test]
    fn test_from_base64_wrong_size() {
        let short = STANDARD.encode([7u8; 16]);
        let err = SessionKey::from_base64(&short).unwrap_err();
        assert!(err.to_string().contains("wrong size"));
    }

    #[test]
    fn test_derived_iv_is_key_prefix() {
        let mut bytes = [0u8; KEY_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let key = SessionKey::from_bytes(bytes);
        assert_eq!(key.derived_iv(), bytes[..IV_SIZE]);
    }

    #[test]
    fn test_debug_redacts() {
        let key = SessionKey::from_bytes([0xAB; KEY_SIZE]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("171"));
    }
}

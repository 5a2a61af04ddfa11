//! Session key wrapping under the server's RSA public key.
//!
//! The server publishes its key either as a PEM document (SPKI or PKCS#1)
//! or as the bare base64 body of an SPKI document. The wrapped value is the
//! PKCS#1 v1.5 encryption of the session key's base64 text, base64-encoded.

use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use crate::keys::SessionKey;

/// Parse a server public key in any of the accepted encodings.
pub fn parse_public_key(text: &str) -> anyhow::Result<RsaPublicKey> {
    let trimmed = text.trim();

    if trimmed.contains("-----BEGIN RSA PUBLIC KEY-----") {
        return RsaPublicKey::from_pkcs1_pem(trimmed)
            .map_err(|e| anyhow::anyhow!("invalid PKCS#1 public key: {e}"));
    }
    if trimmed.contains("-----BEGIN PUBLIC KEY-----") {
        return RsaPublicKey::from_public_key_pem(trimmed)
            .map_err(|e| anyhow::anyhow!("invalid SPKI public key: {e}"));
    }

    let body: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| anyhow::anyhow!("public key is neither PEM nor base64: {e}"))?;
    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| anyhow::anyhow!("invalid DER public key: {e}"))
}

/// Wrap `key` for the `x-client-key` header.
pub fn wrap_session_key(key: &SessionKey, server_public_key: &str) -> anyhow::Result<String> {
    let public = parse_public_key(server_public_key)?;
    let message = key.to_base64();
    let wrapped = public
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, message.as_bytes())
        .map_err(|e| anyhow::anyhow!("RSA key wrapping failed: {e}"))?;
    Ok(STANDARD.encode(wrapped))
}

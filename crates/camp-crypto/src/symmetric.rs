//! AES-CBC payload encryption/decryption
//!
//! Wire format: `base64(AES-CBC(PKCS#7(utf8_json)))`, no IV prefix. Unless
//! an IV is passed explicitly it is the first 16 bytes of the key, so a key
//! must never encrypt two different payloads; every request generates a
//! fresh [`SessionKey`](crate::SessionKey).
//!
//! Key length selects the variant (16/24/32 bytes → AES-128/192/256). Session
//! keys are always 32 bytes; the fixed application key may be shorter.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;

use crate::compress;
use crate::IV_SIZE;

/// Result of [`encrypt`]: base64 ciphertext and the IV actually used
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: String,
    pub iv: [u8; IV_SIZE],
}

/// Encrypt UTF-8 text with AES-CBC/PKCS#7.
///
/// `iv` defaults to the first 16 bytes of `key`.
pub fn encrypt(plaintext: &str, key: &[u8], iv: Option<[u8; IV_SIZE]>) -> anyhow::Result<Sealed> {
    let iv = match iv {
        Some(iv) => iv,
        None => derive_iv(key)?,
    };

    let raw = match key.len() {
        16 => seal::<cbc::Encryptor<aes::Aes128>>(key, &iv, plaintext.as_bytes())?,
        24 => seal::<cbc::Encryptor<aes::Aes192>>(key, &iv, plaintext.as_bytes())?,
        32 => seal::<cbc::Encryptor<aes::Aes256>>(key, &iv, plaintext.as_bytes())?,
        n => anyhow::bail!("unsupported AES key size: {n} bytes"),
    };

    Ok(Sealed {
        ciphertext: STANDARD.encode(raw),
        iv,
    })
}

/// Serialize `value` to JSON and encrypt it.
pub fn encrypt_json(value: &Value, key: &[u8]) -> anyhow::Result<Sealed> {
    let plaintext = serde_json::to_string(value).context("serializing request body")?;
    encrypt(&plaintext, key, None)
}

/// Decrypt a base64 AES-CBC payload into JSON.
///
/// Characters outside the base64 alphabet are dropped first. With
/// `compressed` the decrypted text is itself base64 of a DEFLATE/gzip
/// stream and is inflated before parsing. An empty plaintext or one that is
/// not valid JSON is an error: either the key is stale or the payload was
/// altered.
pub fn decrypt(
    ciphertext: &str,
    key: &[u8],
    iv: Option<[u8; IV_SIZE]>,
    compressed: bool,
) -> anyhow::Result<Value> {
    let iv = match iv {
        Some(iv) => iv,
        None => derive_iv(key)?,
    };

    let cleaned: String = ciphertext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();
    let raw = STANDARD
        .decode(cleaned.as_bytes())
        .context("ciphertext is not valid base64")?;
    if raw.is_empty() {
        anyhow::bail!("ciphertext is empty");
    }

    let plain = match key.len() {
        16 => open::<cbc::Decryptor<aes::Aes128>>(key, &iv, &raw)?,
        24 => open::<cbc::Decryptor<aes::Aes192>>(key, &iv, &raw)?,
        32 => open::<cbc::Decryptor<aes::Aes256>>(key, &iv, &raw)?,
        n => anyhow::bail!("unsupported AES key size: {n} bytes"),
    };

    let mut text =
        String::from_utf8(plain).map_err(|_| anyhow::anyhow!("decrypted payload is not UTF-8"))?;
    if text.is_empty() {
        anyhow::bail!("decrypted payload is empty");
    }

    if compressed {
        text = compress::inflate_base64(&text).context("decompressing response payload")?;
    }

    serde_json::from_str(&text).context("decrypted payload is not valid JSON")
}

fn derive_iv(key: &[u8]) -> anyhow::Result<[u8; IV_SIZE]> {
    if key.len() < IV_SIZE {
        anyhow::bail!(
            "key too short to derive an IV: {} bytes (minimum {IV_SIZE})",
            key.len()
        );
    }
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&key[..IV_SIZE]);
    Ok(iv)
}

fn seal<E: KeyIvInit + BlockEncryptMut>(key: &[u8], iv: &[u8], msg: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = E::new_from_slices(key, iv)
        .map_err(|e| anyhow::anyhow!("invalid key or IV length: {e}"))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(msg))
}

fn open<D: KeyIvInit + BlockDecryptMut>(key: &[u8], iv: &[u8], msg: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = D::new_from_slices(key, iv)
        .map_err(|e| anyhow::anyhow!("invalid key or IV length: {e}"))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(msg)
        .map_err(|_| anyhow::anyhow!("decryption failed: invalid key or corrupted data"))
}


#[cfg(test)]
mod proptest_suite {
    use super::*;
    use crate::keys::generate_session_key;
    use proptest::prelude::*;

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "\\PC{0,24}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-zA-Z_]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn envelope_roundtrip(payload in arb_json()) {
            let key = generate_session_key();
            let sealed = encrypt_json(&payload, key.as_bytes()).unwrap();
            let opened = decrypt(&sealed.ciphertext, key.as_bytes(), None, false).unwrap();
            prop_assert_eq!(opened, payload);
        }
    }
}

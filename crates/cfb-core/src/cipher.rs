//! Symmetric encryption of small secrets for at-rest storage.
//!
//! AES-256-GCM with a fresh random nonce per call. Ciphertext is laid out as
//! `nonce || sealed`, so every value carries what it needs to be decrypted
//! later. The key is passed on every call; nothing is kept here.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use crate::{Error, Result};

/// Key length in bytes (AES-256).
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96-bit GCM nonce).
const NONCE_LENGTH: usize = 12;

/// GCM authentication tag length.
const TAG_LENGTH: usize = 16;

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "key must be {KEY_LENGTH} bytes, got {}",
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| Error::Crypto(format!("invalid key: {e}")))
}

pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LENGTH + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if ciphertext.len() < NONCE_LENGTH + TAG_LENGTH {
        return Err(Error::Crypto("ciphertext is truncated".to_string()));
    }
    let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LENGTH);

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| Error::Crypto("decryption failed: invalid key or corrupted data".to_string()))
}

/// Encrypt a UTF-8 secret and encode it as standard base64, for string stores.
pub fn encrypt_to_string(key: &[u8], plaintext: &str) -> Result<String> {
    Ok(BASE64.encode(encrypt(key, plaintext.as_bytes())?))
}

pub fn decrypt_from_string(key: &[u8], encoded: &str) -> Result<String> {
    let raw = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::Crypto(format!("ciphertext is not valid base64: {e}")))?;
    let plain = decrypt(key, &raw)?;
    String::from_utf8(plain).map_err(|_| Error::Crypto("secret is not valid UTF-8".to_string()))
}

/// Parse a key given as hex (64 chars), base64, or 32 raw bytes.
pub fn parse_key(raw: &str) -> Result<[u8; KEY_LENGTH]> {
    let trimmed = raw.trim();

    let bytes = if trimmed.len() == KEY_LENGTH * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit())
    {
        hex::decode(trimmed).map_err(|e| Error::Crypto(format!("invalid hex key: {e}")))?
    } else if trimmed.len() == KEY_LENGTH {
        trimmed.as_bytes().to_vec()
    } else {
        BASE64
            .decode(trimmed)
            .map_err(|_| Error::Crypto("key is neither hex, base64 nor 32 raw bytes".to_string()))?
    };

    if bytes.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "key must be {KEY_LENGTH} bytes, got {}",
            bytes.len()
        )));
    }

    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LENGTH] = [7u8; KEY_LENGTH];

    #[test]
    fn encrypt_then_decrypt_returns_plaintext() {
        let sealed = encrypt(&KEY, b"hunter2").unwrap();
        assert_ne!(&sealed[NONCE_LENGTH..], b"hunter2");
        assert_eq!(decrypt(&KEY, &sealed).unwrap(), b"hunter2");
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let a = encrypt(&KEY, b"same").unwrap();
        let b = encrypt(&KEY, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let err = encrypt(&[1u8; 16], b"x").unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
        let err = decrypt(&[1u8; 31], &[0u8; 64]).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn truncated_or_tampered_ciphertext_fails() {
        let sealed = encrypt(&KEY, b"secret").unwrap();
        assert!(matches!(
            decrypt(&KEY, &sealed[..NONCE_LENGTH + 3]),
            Err(Error::Crypto(_))
        ));

        let mut tampered = sealed.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;
        assert!(matches!(decrypt(&KEY, &tampered), Err(Error::Crypto(_))));

        let other_key = [8u8; KEY_LENGTH];
        assert!(matches!(decrypt(&other_key, &sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn string_form_round_trips_and_rejects_garbage() {
        let encoded = encrypt_to_string(&KEY, "pässwörd").unwrap();
        assert_eq!(decrypt_from_string(&KEY, &encoded).unwrap(), "pässwörd");
        assert!(matches!(
            decrypt_from_string(&KEY, "not base64!!"),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn parse_key_accepts_hex_base64_and_raw() {
        let hex_key = "11".repeat(KEY_LENGTH);
        assert_eq!(parse_key(&hex_key).unwrap(), [0x11u8; KEY_LENGTH]);

        let b64 = BASE64.encode([0x22u8; KEY_LENGTH]);
        assert_eq!(parse_key(&b64).unwrap(), [0x22u8; KEY_LENGTH]);

        let raw = "a".repeat(KEY_LENGTH);
        assert_eq!(parse_key(&raw).unwrap(), [b'a'; KEY_LENGTH]);

        assert!(parse_key("short").is_err());
    }
}

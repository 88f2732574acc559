//! AES-256-GCM for note bodies.
//!
//! Blob layout: `base64(nonce[12] || ciphertext || tag[16])`, standard
//! alphabet with padding.

use super::key::ContentKey;
use super::{CryptoError, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;

/// AES-GCM nonce length (96 bits).
pub const NONCE_LEN: usize = 12;

const TAG_LEN: usize = 16;

fn cipher_for(key: &ContentKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("AES key init failed: {e}")))
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(plaintext: &str, key: &ContentKey) -> Result<String> {
    let cipher = cipher_for(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("AES-GCM encrypt failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

/// Decrypt a blob produced by [`encrypt`].
///
/// Any failure (bad encoding, truncated payload, tag mismatch, wrong key,
/// non-UTF-8 plaintext) is a [`CryptoError::Decryption`].
pub fn decrypt(blob: &str, key: &ContentKey) -> Result<String> {
    let raw = STANDARD
        .decode(blob.trim())
        .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;

    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decryption(format!(
            "payload too short: {} bytes",
            raw.len()
        )));
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    let cipher = cipher_for(key)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption("authentication tag mismatch".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::Decryption(format!("plaintext is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key::{derive_key, KdfParams};

    fn key_for(identity: &str) -> ContentKey {
        derive_key(Some(identity), &KdfParams::default()).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let key = key_for("alice");
        let long = "x".repeat(10_000);
        for plaintext in ["", "<p>hello</p>", "ünïcødé ✓", long.as_str()] {
            let blob = encrypt(plaintext, &key).unwrap();
            assert_eq!(decrypt(&blob, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_cross_identity_fails() {
        let blob = encrypt("secret", &key_for("alice")).unwrap();
        let err = decrypt(&blob, &key_for("bob")).unwrap_err();
        assert!(matches!(err, CryptoError::Decryption(_)));
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = key_for("alice");
        let a = encrypt("same", &key).unwrap();
        let b = encrypt("same", &key).unwrap();
        assert_ne!(a, b);

        let raw_a = STANDARD.decode(&a).unwrap();
        let raw_b = STANDARD.decode(&b).unwrap();
        assert_ne!(&raw_a[..NONCE_LEN], &raw_b[..NONCE_LEN]);
    }

    #[test]
    fn test_blob_layout() {
        let key = key_for("alice");
        let raw = STANDARD.decode(encrypt("abc", &key).unwrap()).unwrap();
        assert_eq!(raw.len(), NONCE_LEN + 3 + TAG_LEN);
    }

    #[test]
    fn test_tampered_blob_fails() {
        let key = key_for("alice");
        let mut raw = STANDARD.decode(encrypt("payload", &key).unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let err = decrypt(&STANDARD.encode(raw), &key).unwrap_err();
        assert!(matches!(err, CryptoError::Decryption(_)));
    }

    #[test]
    fn test_malformed_blobs_fail() {
        let key = key_for("alice");
        assert!(matches!(
            decrypt("not base64!!", &key),
            Err(CryptoError::Decryption(_))
        ));
        assert!(matches!(
            decrypt(&STANDARD.encode([0u8; 8]), &key),
            Err(CryptoError::Decryption(_))
        ));
        assert!(matches!(decrypt("", &key), Err(CryptoError::Decryption(_))));
    }
}

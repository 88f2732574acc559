//! Identity-bound key derivation.
//!
//! PBKDF2-HMAC-SHA256 over the identity string and a fixed application salt.
//! The same identity always yields the same key, so nothing has to be stored.

use super::{CryptoError, Result};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::fmt;

/// Lowest round count accepted for key stretching.
pub const MIN_ROUNDS: u32 = 100_000;

/// Application-wide salt. Changing it makes every stored note unreadable.
pub const DEFAULT_SALT: &str = "notes-core/content-key/v1";

/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Parameters for [`derive_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    rounds: u32,
    salt: String,
}

impl KdfParams {
    /// Build parameters, rejecting round counts below [`MIN_ROUNDS`].
    pub fn new(rounds: u32, salt: impl Into<String>) -> Result<Self> {
        if rounds < MIN_ROUNDS {
            return Err(CryptoError::WeakParameters {
                rounds,
                minimum: MIN_ROUNDS,
            });
        }
        Ok(Self {
            rounds,
            salt: salt.into(),
        })
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            rounds: MIN_ROUNDS,
            salt: DEFAULT_SALT.to_string(),
        }
    }
}

/// 256-bit symmetric key for note content.
///
/// `Debug` never prints key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey([u8; KEY_LEN]);

impl ContentKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(<redacted>)")
    }
}

/// Derive the content key for `identity`.
///
/// Fails with [`CryptoError::AuthRequired`] when there is no identity or it
/// is blank.
pub fn derive_key(identity: Option<&str>, params: &KdfParams) -> Result<ContentKey> {
    let identity = match identity {
        Some(id) if !id.trim().is_empty() => id,
        _ => return Err(CryptoError::AuthRequired),
    };

    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(
        identity.as_bytes(),
        params.salt.as_bytes(),
        params.rounds,
        &mut out,
    );
    Ok(ContentKey(out))
}

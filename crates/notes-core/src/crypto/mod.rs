//! Content encryption: identity-bound key derivation plus AES-256-GCM.
//!
//! Nothing here is cached. Callers derive the key for every operation and
//! drop it when the operation is done.

pub mod cipher;
pub mod key;

use thiserror::Error;

pub use cipher::{decrypt, encrypt, NONCE_LEN};
pub use key::{derive_key, ContentKey, KdfParams, DEFAULT_SALT, MIN_ROUNDS};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Authentication required: no identity available")]
    AuthRequired,

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation parameters too weak: {rounds} rounds (minimum {minimum})")]
    WeakParameters { rounds: u32, minimum: u32 },
}

pub type Result<T> = std::result::Result<T, CryptoError>;

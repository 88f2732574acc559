//! Configuration types for the note store.
//!
//! Every field has a default, so an empty `{}` document is a valid config.
//! Loading from disk is left to the front end.

use crate::crypto::{self, KdfParams, DEFAULT_SALT, MIN_ROUNDS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Key derivation settings
    #[serde(default)]
    pub kdf: KdfConfig,

    /// Autosave settings
    #[serde(default)]
    pub autosave: AutoSaveConfig,

    /// Top-level path segment under which per-user data lives
    #[serde(default = "default_users_root")]
    pub users_root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfConfig {
    /// PBKDF2 iteration count (minimum 100000)
    #[serde(default = "default_rounds")]
    pub rounds: u32,

    /// Application-wide salt. Changing it makes existing notes unreadable.
    #[serde(default = "default_salt")]
    pub salt: String,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            salt: default_salt(),
        }
    }
}

impl KdfConfig {
    /// Validated parameters for key derivation.
    pub fn params(&self) -> crypto::Result<KdfParams> {
        KdfParams::new(self.rounds, self.salt.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSaveConfig {
    /// Quiet period after the last edit before a save fires
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
        }
    }
}

impl AutoSaveConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

fn default_rounds() -> u32 {
    MIN_ROUNDS
}

fn default_salt() -> String {
    DEFAULT_SALT.to_string()
}

fn default_quiet_period_ms() -> u64 {
    3000
}

fn default_users_root() -> String {
    "users".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kdf: KdfConfig::default(),
            autosave: AutoSaveConfig::default(),
            users_root: default_users_root(),
        }
    }
}

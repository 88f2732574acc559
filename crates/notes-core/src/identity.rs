//! Identity of the signed-in user.
//!
//! The identity string scopes every remote path and seeds the content key.
//! Issuing it is somebody else's job; this module only carries it around.

use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity must not be empty")]
    Empty,
    #[error("Identity contains a character not allowed in store paths: {0:?}")]
    InvalidChar(char),
}

/// Opaque, stable identifier of the current user.
///
/// Used as a remote path segment, so it may not contain `/ . # $ [ ]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }
        if let Some(c) = trimmed.chars().find(|c| "/.#$[]".contains(*c) || c.is_control()) {
            return Err(IdentityError::InvalidChar(c));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the current identity. `None` means signed out.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

/// Identity slot bound to a sign-in session.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    current: RwLock<Option<Identity>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            current: RwLock::new(Some(identity)),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(identity);
    }

    pub fn sign_out(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl<T: IdentityProvider> IdentityProvider for Arc<T> {
    fn current(&self) -> Option<Identity> {
        (**self).current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_trims_and_validates() {
        assert_eq!(Identity::new("  uid-42 ").unwrap().as_str(), "uid-42");
        assert_eq!(Identity::new("   "), Err(IdentityError::Empty));
        assert_eq!(Identity::new("a/b"), Err(IdentityError::InvalidChar('/')));
        assert_eq!(Identity::new("a.b"), Err(IdentityError::InvalidChar('.')));
    }

    #[test]
    fn test_session_identity_sign_in_out() {
        let session = SessionIdentity::new();
        assert!(session.current().is_none());

        session.sign_in(Identity::new("alice").unwrap());
        assert_eq!(session.current().unwrap().as_str(), "alice");

        session.sign_out();
        assert!(session.current().is_none());
    }
}

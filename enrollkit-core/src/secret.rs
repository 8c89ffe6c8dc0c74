//! Secret material that flows through a signup run.
//!
//! The passphrase enters the run from the caller and is only ever exposed
//! to the stretcher. The stretched halves live for the duration of the run
//! and are wiped on drop. The salt is not secret (it is stored in the
//! device configuration and sent to the service alongside the password
//! hash) but gets its own type so it cannot be confused with key material.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CollaboratorError;

/// A user passphrase.
///
/// Never logged, never serialized; the inner string is only reachable
/// through [`Passphrase::expose`].
pub struct Passphrase(SecretString);

impl Passphrase {
    /// Wraps a passphrase string.
    #[must_use]
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(SecretString::from(passphrase.into()))
    }

    /// Exposes the passphrase to a consumer that genuinely needs it.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Returns `true` for an empty passphrase.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl From<&str> for Passphrase {
    fn from(passphrase: &str) -> Self {
        Self::new(passphrase)
    }
}

impl From<String> for Passphrase {
    fn from(passphrase: String) -> Self {
        Self::new(passphrase)
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}

/// The random salt fed to the stretcher, fresh for every run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Generates `len` random salt bytes from the OS RNG.
    ///
    /// # Errors
    /// Returns [`CollaboratorError::Internal`] if the OS RNG fails.
    pub fn random(len: usize) -> Result<Self, CollaboratorError> {
        let mut bytes = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CollaboratorError::internal(format!("salt generation failed: {e}")))?;
        Ok(Self(bytes))
    }

    /// Wraps existing salt bytes.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the salt bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the salt length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the salt is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", hex::encode(&self.0))
    }
}

/// The two halves derived from (passphrase, salt) by the secret stretcher.
///
/// `password_hash` is sent to the remote service for verification;
/// `client_half` never leaves the device and protects device-held keys.
/// Both halves are wiped when the value is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StretchedSecret {
    password_hash: [u8; 32],
    client_half: [u8; 32],
}

impl StretchedSecret {
    /// Builds a stretched secret from its two halves.
    #[must_use]
    pub const fn new(password_hash: [u8; 32], client_half: [u8; 32]) -> Self {
        Self {
            password_hash,
            client_half,
        }
    }

    /// The half sent to the remote service for verification.
    #[must_use]
    pub const fn password_hash(&self) -> &[u8; 32] {
        &self.password_hash
    }

    /// The half kept on the device to bind device-held keys.
    #[must_use]
    pub const fn client_half(&self) -> &[u8; 32] {
        &self.client_half
    }
}

impl fmt::Debug for StretchedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StretchedSecret([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_debug_is_redacted() {
        let passphrase = Passphrase::from("correct horse");
        assert_eq!(format!("{passphrase:?}"), "Passphrase([REDACTED])");
        assert_eq!(passphrase.expose(), "correct horse");
    }

    #[test]
    fn test_salt_randomness() {
        let a = Salt::random(16).unwrap();
        let b = Salt::random(16).unwrap();
        assert_eq!(a.len(), 16);
        assert_eq!(b.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_stretched_secret_debug_is_redacted() {
        let secret = StretchedSecret::new([1; 32], [2; 32]);
        assert_eq!(format!("{secret:?}"), "StretchedSecret([REDACTED])");
        assert_eq!(secret.password_hash(), &[1; 32]);
        assert_eq!(secret.client_half(), &[2; 32]);
    }
}

//! Passphrase stretching.
//!
//! The stretcher turns a low-entropy passphrase and a random salt into the
//! two 32-byte halves the rest of the run consumes. It is deterministic:
//! the same (passphrase, salt) pair always yields byte-identical output,
//! which is what lets the client half re-derive after a fresh login.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroize;

use crate::context::RunContext;
use crate::error::CollaboratorError;
use crate::secret::{Passphrase, Salt, StretchedSecret};

/// Argon2id memory cost in KiB (64 MiB).
pub const ARGON2_MEMORY_KB: u32 = 65536;

/// Argon2id iteration count.
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id lane count.
pub const ARGON2_PARALLELISM: u32 = 4;

/// Salt length the Argon2 stretcher requires.
pub const ARGON2_SALT_LEN: usize = 16;

/// Total derived bytes: password hash then client half.
const STRETCH_OUTPUT_LEN: usize = 64;

/// Derives run secrets from a passphrase.
///
/// Implementations must be deterministic for a fixed (passphrase, salt)
/// pair and are expected to be deliberately slow.
pub trait SecretStretcher: Send + Sync {
    /// The salt length in bytes this stretcher requires.
    fn salt_len(&self) -> usize;

    /// Derives the stretched secret from (passphrase, salt).
    ///
    /// # Errors
    /// Returns an error if the salt has the wrong length, derivation
    /// fails, or the context is no longer live.
    fn stretch(
        &self,
        ctx: &RunContext,
        passphrase: &Passphrase,
        salt: &Salt,
    ) -> Result<StretchedSecret, CollaboratorError>;
}

/// Argon2id-based stretcher.
///
/// The memory-hard parameters (64 MiB, 3 iterations, 4 lanes) make offline
/// guessing expensive while keeping a single derivation well under a
/// second on current hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Stretcher;

impl Argon2Stretcher {
    /// Creates the stretcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SecretStretcher for Argon2Stretcher {
    fn salt_len(&self) -> usize {
        ARGON2_SALT_LEN
    }

    fn stretch(
        &self,
        ctx: &RunContext,
        passphrase: &Passphrase,
        salt: &Salt,
    ) -> Result<StretchedSecret, CollaboratorError> {
        ctx.ensure_active()?;

        if salt.len() != ARGON2_SALT_LEN {
            return Err(CollaboratorError::validation(
                "salt",
                format!("expected {ARGON2_SALT_LEN} bytes, got {}", salt.len()),
            ));
        }

        let params = Params::new(
            ARGON2_MEMORY_KB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(STRETCH_OUTPUT_LEN),
        )
        .map_err(|e| CollaboratorError::crypto(format!("invalid argon2 params: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut okm = [0u8; STRETCH_OUTPUT_LEN];
        argon2
            .hash_password_into(passphrase.expose().as_bytes(), salt.as_bytes(), &mut okm)
            .map_err(|e| CollaboratorError::crypto(format!("argon2 derivation failed: {e}")))?;

        let mut password_hash = [0u8; 32];
        let mut client_half = [0u8; 32];
        password_hash.copy_from_slice(&okm[..32]);
        client_half.copy_from_slice(&okm[32..]);
        okm.zeroize();

        Ok(StretchedSecret::new(password_hash, client_half))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stretch_is_deterministic() {
        let stretcher = Argon2Stretcher::new();
        let ctx = RunContext::background();
        let passphrase = Passphrase::from("correct horse");
        let salt = Salt::from_bytes(vec![5; ARGON2_SALT_LEN]);

        let a = stretcher.stretch(&ctx, &passphrase, &salt).unwrap();
        let b = stretcher.stretch(&ctx, &passphrase, &salt).unwrap();

        assert_eq!(a.password_hash(), b.password_hash());
        assert_eq!(a.client_half(), b.client_half());
        // The two halves are independent outputs.
        assert_ne!(a.password_hash(), a.client_half());
    }

    #[test]
    fn test_different_salts_diverge() {
        let stretcher = Argon2Stretcher::new();
        let ctx = RunContext::background();
        let passphrase = Passphrase::from("correct horse");

        let a = stretcher
            .stretch(&ctx, &passphrase, &Salt::from_bytes(vec![1; 16]))
            .unwrap();
        let b = stretcher
            .stretch(&ctx, &passphrase, &Salt::from_bytes(vec![2; 16]))
            .unwrap();

        assert_ne!(a.password_hash(), b.password_hash());
        assert_ne!(a.client_half(), b.client_half());
    }

    #[test]
    fn test_wrong_salt_length_is_rejected() {
        let stretcher = Argon2Stretcher::new();
        let ctx = RunContext::background();
        let err = stretcher
            .stretch(&ctx, &Passphrase::from("pw"), &Salt::from_bytes(vec![0; 8]))
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Validation { .. }));
    }

    #[test]
    fn test_dead_context_short_circuits() {
        let stretcher = Argon2Stretcher::new();
        let ctx = RunContext::background();
        ctx.cancel_handle().cancel();

        let err = stretcher
            .stretch(
                &ctx,
                &Passphrase::from("pw"),
                &Salt::from_bytes(vec![0; 16]),
            )
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Cancelled { .. }));
    }
}

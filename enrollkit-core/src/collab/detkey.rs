//! Deterministic subkey generation.
//!
//! After device registration the account gains two deterministic subkeys,
//! derived from the client half of the stretched passphrase: an Ed25519
//! signing subkey and an X25519 encryption subkey. Stretching the same
//! passphrase with the same salt always reproduces them, so they can be
//! re-derived on a new device without any key transfer.
//!
//! The public halves are announced to the directory, each announcement
//! signed by the device signing key.

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use sha2::Sha256;
use std::sync::Arc;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::collab::directory::KeyAnnouncer;
use crate::collab::registrar::DeviceSigningKey;
use crate::context::RunContext;
use crate::error::CollaboratorError;
use crate::secret::StretchedSecret;
use crate::types::{AccountId, AccountRecord, KeyId, KeyRole, PublicKeyInfo};

/// Label for deriving the signing subkey seed.
const SIGNING_KDF_LABEL: &[u8] = b"enroll:detkey:signing";

/// Label for deriving the encryption subkey seed.
const ENCRYPTION_KDF_LABEL: &[u8] = b"enroll:detkey:encryption";

/// Label for key announcement signatures.
const ANNOUNCE_LABEL: &[u8] = b"enroll:key-announce";

/// Derives and announces the account's deterministic subkeys.
#[async_trait]
pub trait DeterministicKeyGenerator: Send + Sync {
    /// Generates the deterministic subkeys for the account.
    ///
    /// Side effect only: announced keys show up in later record loads, but
    /// nothing is handed back to the caller. `device_key` is the signer for
    /// the announcements; registration can leave it absent.
    ///
    /// # Errors
    ///
    /// Returns an error if derivation or announcement fails, or if the
    /// context is no longer active.
    async fn generate(
        &self,
        ctx: &RunContext,
        record: &AccountRecord,
        device_key: Option<&DeviceSigningKey>,
        stretched: &StretchedSecret,
    ) -> Result<(), CollaboratorError>;
}

/// Generator deriving subkey seeds with HKDF-SHA256 over the client half.
#[derive(Debug)]
pub struct HkdfKeyGenerator<A> {
    announcer: Arc<A>,
}

impl<A: KeyAnnouncer> HkdfKeyGenerator<A> {
    /// Creates a generator announcing through the given announcer.
    #[must_use]
    pub fn new(announcer: Arc<A>) -> Self {
        Self { announcer }
    }

    async fn announce(
        &self,
        ctx: &RunContext,
        account_id: &AccountId,
        device_key: &DeviceSigningKey,
        public_key: &[u8],
    ) -> Result<(), CollaboratorError> {
        let info = PublicKeyInfo {
            key_id: KeyId::for_public_key(public_key),
            role: KeyRole::Derived,
            public_key: public_key.to_vec(),
        };
        let message = announcement_message(account_id, &info);
        let signature = device_key.sign(&message);
        self.announcer
            .announce_key(ctx, account_id, &info, &device_key.key_id(), signature)
            .await
    }
}

#[async_trait]
impl<A: KeyAnnouncer> DeterministicKeyGenerator for HkdfKeyGenerator<A> {
    async fn generate(
        &self,
        ctx: &RunContext,
        record: &AccountRecord,
        device_key: Option<&DeviceSigningKey>,
        stretched: &StretchedSecret,
    ) -> Result<(), CollaboratorError> {
        ctx.ensure_active()?;
        let device_key = device_key.ok_or_else(|| {
            CollaboratorError::validation("device_key", "required to sign key announcements")
        })?;
        let account_id = record.account_id;

        let mut seed =
            derive_subkey_seed(stretched.client_half(), SIGNING_KDF_LABEL, &account_id)?;
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        let signing_public = signing.verifying_key().to_bytes();
        self.announce(ctx, &account_id, device_key, &signing_public)
            .await?;

        let mut seed =
            derive_subkey_seed(stretched.client_half(), ENCRYPTION_KDF_LABEL, &account_id)?;
        let encryption = StaticSecret::from(seed);
        seed.zeroize();
        let encryption_public = PublicKey::from(&encryption).to_bytes();
        self.announce(ctx, &account_id, device_key, &encryption_public)
            .await?;

        Ok(())
    }
}

/// Derives one 32-byte subkey seed from the client half.
///
/// Info = label || account id, so the same passphrase on two accounts
/// yields unrelated subkeys.
fn derive_subkey_seed(
    client_half: &[u8; 32],
    label: &[u8],
    account_id: &AccountId,
) -> Result<[u8; 32], CollaboratorError> {
    let mut info = Vec::with_capacity(label.len() + 16);
    info.extend_from_slice(label);
    info.extend_from_slice(account_id.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, client_half);
    let mut seed = [0u8; 32];
    hkdf.expand(&info, &mut seed)
        .map_err(|_| CollaboratorError::crypto("subkey seed derivation failed"))?;

    Ok(seed)
}

/// Builds the message a key announcement signature covers.
///
/// Format: `"enroll:key-announce" || account_id || key_id || public_key`
fn announcement_message(account_id: &AccountId, info: &PublicKeyInfo) -> Vec<u8> {
    let mut message =
        Vec::with_capacity(ANNOUNCE_LABEL.len() + 16 + 32 + info.public_key.len());
    message.extend_from_slice(ANNOUNCE_LABEL);
    message.extend_from_slice(account_id.as_bytes());
    message.extend_from_slice(info.key_id.as_bytes());
    message.extend_from_slice(&info.public_key);
    message
}

//! Device registration and device key sealing.
//!
//! Registering a device creates the account's first signing key. The secret
//! half never leaves the device in the clear: it is sealed under a key
//! derived from the client half of the stretched passphrase, so possession
//! of the passphrase is required to recover it on this device.
//!
//! # Sealing
//!
//! 1. A sealing key is derived from the client half with HKDF-SHA256,
//!    bound to the account and device identifiers through the info field.
//! 2. The Ed25519 secret key is encrypted with XChaCha20-Poly1305 using
//!    the same identifiers as associated data.
//!
//! The resulting [`SealedDeviceKey`] is stored in the device configuration
//! as part of the [`DeviceRecord`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::config::DeviceConfigStore;
use crate::context::RunContext;
use crate::error::CollaboratorError;
use crate::types::{AccountId, AccountRecord, DeviceId, KeyId};

// Constants

/// Label for HKDF derivation of the sealing key.
const SEAL_KDF_LABEL: &[u8] = b"enroll:device-seal";

/// Label for AEAD associated data.
const SEAL_AAD_LABEL: &[u8] = b"enroll:device-key";

/// XChaCha20-Poly1305 nonce size.
const NONCE_SIZE: usize = 24;

/// Size of an Ed25519 secret key.
const ED25519_SECRET_KEY_SIZE: usize = 32;

// Device Signing Key

/// The Ed25519 signing key created for a device at registration.
///
/// Wraps the keypair so callers deal in fingerprints and signatures rather
/// than raw dalek types. The secret half zeroizes on drop.
#[derive(Clone)]
pub struct DeviceSigningKey {
    signing_key: SigningKey,
}

impl DeviceSigningKey {
    /// Generates a fresh random signing key.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstructs a signing key from its 32 secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; ED25519_SECRET_KEY_SIZE]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Returns the fingerprint of the public half.
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        KeyId::for_public_key(&self.public_key_bytes())
    }

    /// Returns the public half as a dalek verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Signs a message, returning the detached signature bytes.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for DeviceSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSigningKey")
            .field("key_id", &self.key_id())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

// Sealed Device Key

/// A device signing key's secret half, sealed under the client half.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedDeviceKey {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl SealedDeviceKey {
    /// Seals a signing key's secret half.
    ///
    /// # Errors
    ///
    /// Returns an error if nonce generation or encryption fails.
    pub fn seal(
        key: &DeviceSigningKey,
        client_half: &[u8; 32],
        account_id: &AccountId,
        device_id: &DeviceId,
    ) -> Result<Self, CollaboratorError> {
        let seal_key = derive_seal_key(client_half, account_id, device_id)?;
        let cipher =
            XChaCha20Poly1305::new_from_slice(&seal_key).expect("key length is always 32");

        let nonce_bytes = random_nonce()?;
        let nonce = XNonce::from_slice(&nonce_bytes);
        let aad = build_seal_aad(account_id, device_id);

        let mut secret = key.signing_key.to_bytes();
        let encrypted = cipher.encrypt(
            nonce,
            Payload {
                msg: &secret,
                aad: &aad,
            },
        );
        secret.zeroize();

        let ciphertext = encrypted
            .map_err(|_| CollaboratorError::crypto("device key sealing failed"))?;

        Ok(Self {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Recovers the signing key from the sealed form.
    ///
    /// # Errors
    ///
    /// Returns an error if the client half or either identifier does not
    /// match the one the key was sealed under.
    pub fn open(
        &self,
        client_half: &[u8; 32],
        account_id: &AccountId,
        device_id: &DeviceId,
    ) -> Result<DeviceSigningKey, CollaboratorError> {
        let seal_key = derive_seal_key(client_half, account_id, device_id)?;
        let cipher =
            XChaCha20Poly1305::new_from_slice(&seal_key).expect("key length is always 32");

        let nonce = XNonce::from_slice(&self.nonce);
        let aad = build_seal_aad(account_id, device_id);

        let mut plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: self.ciphertext.as_slice(),
                    aad: &aad,
                },
            )
            .map_err(|_| CollaboratorError::crypto("device key unsealing failed"))?;

        if plaintext.len() != ED25519_SECRET_KEY_SIZE {
            plaintext.zeroize();
            return Err(CollaboratorError::crypto(
                "unsealed device key has unexpected length",
            ));
        }

        let mut secret: [u8; ED25519_SECRET_KEY_SIZE] = plaintext
            .as_slice()
            .try_into()
            .expect("length already validated");
        plaintext.zeroize();

        let key = DeviceSigningKey::from_bytes(&secret);
        secret.zeroize();
        Ok(key)
    }
}

impl fmt::Debug for SealedDeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedDeviceKey")
            .field("nonce", &hex::encode(self.nonce))
            .field("ciphertext", &format!("{} bytes", self.ciphertext.len()))
            .finish()
    }
}

/// Derives the sealing key from the client half.
///
/// Info = label || account id || device id, so a sealed key only opens for
/// the account and device it was created for.
fn derive_seal_key(
    client_half: &[u8; 32],
    account_id: &AccountId,
    device_id: &DeviceId,
) -> Result<[u8; 32], CollaboratorError> {
    let mut info = Vec::with_capacity(SEAL_KDF_LABEL.len() + 16 + 16);
    info.extend_from_slice(SEAL_KDF_LABEL);
    info.extend_from_slice(account_id.as_bytes());
    info.extend_from_slice(device_id.as_uuid().as_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, client_half);
    let mut key = [0u8; 32];
    hkdf.expand(&info, &mut key)
        .map_err(|_| CollaboratorError::crypto("seal key derivation failed"))?;

    Ok(key)
}

/// Builds associated data for device key sealing.
///
/// Format: `account_id || device_id || "enroll:device-key"`
fn build_seal_aad(account_id: &AccountId, device_id: &DeviceId) -> Vec<u8> {
    let mut aad = Vec::with_capacity(16 + 16 + SEAL_AAD_LABEL.len());
    aad.extend_from_slice(account_id.as_bytes());
    aad.extend_from_slice(device_id.as_uuid().as_bytes());
    aad.extend_from_slice(SEAL_AAD_LABEL);
    aad
}

/// Generates a random AEAD nonce.
fn random_nonce() -> Result<[u8; NONCE_SIZE], CollaboratorError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| CollaboratorError::internal(format!("nonce generation failed: {e}")))?;
    Ok(nonce)
}

// Device Record

/// Everything the device configuration keeps about the registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Random identifier assigned at registration.
    pub device_id: DeviceId,
    /// Human-readable device name chosen by the user.
    pub name: String,
    /// Fingerprint of the device signing key.
    pub key_id: KeyId,
    /// Public half of the device signing key.
    pub public_key: Vec<u8>,
    /// Sealed secret half of the device signing key.
    pub sealed_key: SealedDeviceKey,
}

// Registrar

/// Creates the device signing key for a freshly joined account.
#[async_trait]
pub trait DeviceRegistrar: Send + Sync {
    /// Registers this device against the given account.
    ///
    /// Implementations normally return the new signing key. `None` is
    /// reserved for registrars whose key custody lives elsewhere; the
    /// account then depends on a later key import for signing capability.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation, sealing or persistence fails, or
    /// if the context is no longer active.
    async fn register(
        &self,
        ctx: &RunContext,
        device_name: &str,
        client_half: &[u8; 32],
        record: &AccountRecord,
    ) -> Result<Option<DeviceSigningKey>, CollaboratorError>;
}

/// Registrar that seals the new key under the client half and records it in
/// the device configuration.
#[derive(Debug)]
pub struct SealedDeviceRegistrar<S> {
    config: Arc<S>,
}

impl<S: DeviceConfigStore> SealedDeviceRegistrar<S> {
    /// Creates a registrar writing to the given configuration store.
    #[must_use]
    pub fn new(config: Arc<S>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl<S: DeviceConfigStore> DeviceRegistrar for SealedDeviceRegistrar<S> {
    async fn register(
        &self,
        ctx: &RunContext,
        device_name: &str,
        client_half: &[u8; 32],
        record: &AccountRecord,
    ) -> Result<Option<DeviceSigningKey>, CollaboratorError> {
        ctx.ensure_active()?;

        if device_name.trim().is_empty() {
            return Err(CollaboratorError::validation(
                "device_name",
                "must not be empty",
            ));
        }

        let key = DeviceSigningKey::generate();
        let device_id = DeviceId::generate();
        let sealed = SealedDeviceKey::seal(&key, client_half, &record.account_id, &device_id)?;

        self.config.record_device(DeviceRecord {
            device_id,
            name: device_name.to_string(),
            key_id: key.key_id(),
            public_key: key.public_key_bytes().to_vec(),
            sealed_key: sealed,
        })?;

        Ok(Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfigStore, MemoryConfigStore};
    use ed25519_dalek::Verifier;

    fn test_account_record() -> AccountRecord {
        AccountRecord {
            account_id: AccountId::new([3; 16]),
            username: "alice".to_string(),
            public_keys: vec![],
        }
    }

    #[test]
    fn test_signing_key_signatures_verify() {
        let key = DeviceSigningKey::generate();
        let message = b"device registration";
        let signature = key.sign(message);

        let sig = ed25519_dalek::Signature::from_slice(&signature).unwrap();
        assert!(key.verifying_key().verify(message, &sig).is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = DeviceSigningKey::generate();
        let debug = format!("{key:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains(&key.key_id().to_hex()));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = DeviceSigningKey::generate();
        let client_half = [9u8; 32];
        let account_id = AccountId::new([1; 16]);
        let device_id = DeviceId::generate();

        let sealed = SealedDeviceKey::seal(&key, &client_half, &account_id, &device_id).unwrap();
        let opened = sealed.open(&client_half, &account_id, &device_id).unwrap();

        assert_eq!(opened.key_id(), key.key_id());
        assert_eq!(opened.public_key_bytes(), key.public_key_bytes());
    }

    #[test]
    fn test_open_rejects_wrong_client_half() {
        let key = DeviceSigningKey::generate();
        let account_id = AccountId::new([1; 16]);
        let device_id = DeviceId::generate();

        let sealed = SealedDeviceKey::seal(&key, &[9u8; 32], &account_id, &device_id).unwrap();
        let result = sealed.open(&[10u8; 32], &account_id, &device_id);

        assert!(matches!(result, Err(CollaboratorError::Crypto { .. })));
    }

    #[test]
    fn test_open_rejects_wrong_device() {
        let key = DeviceSigningKey::generate();
        let client_half = [9u8; 32];
        let account_id = AccountId::new([1; 16]);

        let sealed =
            SealedDeviceKey::seal(&key, &client_half, &account_id, &DeviceId::generate()).unwrap();
        let result = sealed.open(&client_half, &account_id, &DeviceId::generate());

        assert!(matches!(result, Err(CollaboratorError::Crypto { .. })));
    }

    #[tokio::test]
    async fn test_registrar_persists_device_record() {
        let config = Arc::new(MemoryConfigStore::new());
        let registrar = SealedDeviceRegistrar::new(Arc::clone(&config));
        let ctx = RunContext::background();

        let key = registrar
            .register(&ctx, "work laptop", &[7u8; 32], &test_account_record())
            .await
            .unwrap()
            .unwrap();

        let stored = config.load().unwrap().unwrap();
        let device = stored.device.unwrap();
        assert_eq!(device.name, "work laptop");
        assert_eq!(device.key_id, key.key_id());
        assert_eq!(device.public_key, key.public_key_bytes().to_vec());

        let opened = device
            .sealed_key
            .open(&[7u8; 32], &test_account_record().account_id, &device.device_id)
            .unwrap();
        assert_eq!(opened.key_id(), key.key_id());
    }

    #[tokio::test]
    async fn test_registrar_rejects_empty_device_name() {
        let config = Arc::new(MemoryConfigStore::new());
        let registrar = SealedDeviceRegistrar::new(config);
        let ctx = RunContext::background();

        let result = registrar
            .register(&ctx, "  ", &[7u8; 32], &test_account_record())
            .await;

        assert!(matches!(result, Err(CollaboratorError::Validation { .. })));
    }
}

//! Core type definitions for the signup engine.
//!
//! Identifiers follow the same conventions everywhere: fixed-size byte
//! newtypes with hex text forms, and records that serialize with serde for
//! both the wire and local persistence.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use strum::{Display, EnumString};

/// Domain separation label for key fingerprints.
const KEY_ID_LABEL: &[u8] = b"enroll:key-id";

// Identifiers

/// A 16-byte account identifier assigned by the join service.
///
/// Opaque to the engine: it is received from the service at join time,
/// carried through the remaining stages and recorded in the device
/// configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 16]);

impl AccountId {
    /// Creates a new `AccountId` from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the account ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Converts the account ID to a hexadecimal string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creates an `AccountId` from a hexadecimal string.
    ///
    /// # Errors
    /// Returns an error if the string is not valid hex or not exactly 16 bytes.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_hex())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for AccountId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 32-byte public key fingerprint.
///
/// Computed as `SHA256("enroll:key-id" || public_key_bytes)` so that
/// fingerprints of different key kinds never collide with raw key bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(pub [u8; 32]);

impl KeyId {
    /// Creates a new `KeyId` from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Computes the fingerprint of a public key.
    #[must_use]
    pub fn for_public_key(public_key: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_ID_LABEL);
        hasher.update(public_key);
        Self(hasher.finalize().into())
    }

    /// Returns the raw bytes of the key ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Converts the key ID to a hexadecimal string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creates a `KeyId` from a hexadecimal string.
    ///
    /// # Errors
    /// Returns an error if the string is not valid hex or not exactly 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.to_hex())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for KeyId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A random per-device identifier, stable for the lifetime of an install.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub uuid::Uuid);

impl DeviceId {
    /// Generates a fresh random device ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Records

/// The role a public key plays on an account.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    /// The device signing key created during signup.
    Primary,
    /// A key derived deterministically from existing secret material.
    Derived,
    /// A key imported from an external keyring.
    Imported,
}

/// A public key attached to an account, as the service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyInfo {
    /// Fingerprint of the key.
    pub key_id: KeyId,
    /// Role of the key on the account.
    pub role: KeyRole,
    /// Raw public key bytes.
    pub public_key: Vec<u8>,
}

/// The loaded public profile of an account.
///
/// Fetched from the directory right after join, at which point the public
/// key list is usually still empty; later stages attach keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// The account's identifier.
    pub account_id: AccountId,
    /// The account's username.
    pub username: String,
    /// Public keys known for the account. May be empty right after join.
    pub public_keys: Vec<PublicKeyInfo>,
}

impl AccountRecord {
    /// Returns `true` if the account already has public keys attached.
    #[must_use]
    pub fn has_public_keys(&self) -> bool {
        !self.public_keys.is_empty()
    }
}

/// Payload for requesting a signup invitation from the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRequest {
    /// Email address the invitation should go to.
    pub email: String,
    /// Full name of the requester.
    pub full_name: String,
    /// Free-form notes accompanying the request.
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_hex_roundtrip() {
        let id = AccountId::new([0xAB; 16]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(AccountId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn test_account_id_from_hex_rejects_wrong_length() {
        assert!(AccountId::from_hex("abcd").is_err());
        assert!(AccountId::from_hex("not hex at all!").is_err());
    }

    #[test]
    fn test_key_id_is_label_separated() {
        let public_key = [7u8; 32];
        let key_id = KeyId::for_public_key(&public_key);

        let mut hasher = Sha256::new();
        hasher.update(public_key);
        let unlabelled: [u8; 32] = hasher.finalize().into();

        assert_ne!(key_id.as_bytes(), &unlabelled);
        // Same input, same fingerprint.
        assert_eq!(KeyId::for_public_key(&public_key), key_id);
    }

    #[test]
    fn test_device_ids_are_unique() {
        assert_ne!(DeviceId::generate(), DeviceId::generate());
    }

    #[test]
    fn test_key_role_display() {
        assert_eq!(KeyRole::Primary.to_string(), "primary");
        assert_eq!(KeyRole::Derived.to_string(), "derived");
        assert_eq!(KeyRole::Imported.to_string(), "imported");
    }

    #[test]
    fn test_account_record_key_presence() {
        let mut record = AccountRecord {
            account_id: AccountId::new([1; 16]),
            username: "alice".to_string(),
            public_keys: vec![],
        };
        assert!(!record.has_public_keys());

        record.public_keys.push(PublicKeyInfo {
            key_id: KeyId::for_public_key(&[2; 32]),
            role: KeyRole::Primary,
            public_key: vec![2; 32],
        });
        assert!(record.has_public_keys());
    }
}

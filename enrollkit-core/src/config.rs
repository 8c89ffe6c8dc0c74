//! Persisted device configuration.
//!
//! One small record per install: which account this device belongs to, the
//! salt that account signed up with, and the provisioned device record.
//! `CheckRegistered` reads it before a signup attempt; the join stage and
//! the device registrar write it. Stored as a bincode blob, either in
//! memory or as a file written with an atomic rename.

use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::collab::registrar::DeviceRecord;
use crate::error::CollaboratorError;
use crate::secret::Salt;
use crate::types::AccountId;

/// The configuration record for this device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Account this device is registered to, once signup completed.
    pub account_id: Option<AccountId>,
    /// Username the account was created with.
    pub username: Option<String>,
    /// Salt used when the account's passphrase was stretched.
    pub salt: Option<Salt>,
    /// The provisioned device record, including the sealed secret key.
    pub device: Option<DeviceRecord>,
}

/// Storage for the device configuration.
///
/// Loads and stores whole records; the provided `record_*` helpers do a
/// read-modify-write, which is sufficient because a signup run mutates the
/// configuration from a single thread.
pub trait DeviceConfigStore: Send + Sync {
    /// Loads the configuration, or `None` if none has ever been stored.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read or decoded.
    fn load(&self) -> Result<Option<DeviceConfig>, CollaboratorError>;

    /// Replaces the stored configuration.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn store(&self, config: &DeviceConfig) -> Result<(), CollaboratorError>;

    /// Records the joined account into the configuration.
    ///
    /// # Errors
    /// Returns an error if loading or storing the configuration fails.
    fn record_account(
        &self,
        account_id: &AccountId,
        username: &str,
        salt: &Salt,
    ) -> Result<(), CollaboratorError> {
        let mut config = self.load()?.unwrap_or_default();
        config.account_id = Some(*account_id);
        config.username = Some(username.to_string());
        config.salt = Some(salt.clone());
        self.store(&config)
    }

    /// Records the provisioned device into the configuration.
    ///
    /// # Errors
    /// Returns an error if loading or storing the configuration fails.
    fn record_device(&self, device: DeviceRecord) -> Result<(), CollaboratorError> {
        let mut config = self.load()?.unwrap_or_default();
        config.device = Some(device);
        self.store(&config)
    }
}

fn encode(config: &DeviceConfig) -> Result<Vec<u8>, CollaboratorError> {
    bincode::serialize(config)
        .map_err(|e| CollaboratorError::internal(format!("config serialization failed: {e}")))
}

fn decode(bytes: &[u8]) -> Result<DeviceConfig, CollaboratorError> {
    bincode::deserialize(bytes)
        .map_err(|e| CollaboratorError::internal(format!("config deserialization failed: {e}")))
}

/// In-memory configuration store.
///
/// Useful for tests and for embedders that manage persistence themselves.
/// Keeps the serialized form internally so the encode/decode path is
/// exercised exactly like the file-backed store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    bytes: RwLock<Option<Vec<u8>>>,
}

impl MemoryConfigStore {
    /// Creates an empty store: `load` returns `None` until a store happens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `config`.
    ///
    /// # Panics
    /// Panics if the configuration cannot be serialized, which only happens
    /// on allocation failure.
    #[must_use]
    pub fn with_config(config: &DeviceConfig) -> Self {
        let store = Self::new();
        store.store(config).expect("serializing a DeviceConfig");
        store
    }

    /// Drops any stored configuration.
    pub fn clear(&self) {
        if let Ok(mut bytes) = self.bytes.write() {
            *bytes = None;
        }
    }
}

impl DeviceConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Option<DeviceConfig>, CollaboratorError> {
        let bytes = self
            .bytes
            .read()
            .map_err(|_| CollaboratorError::internal("config lock poisoned"))?;
        bytes.as_deref().map(decode).transpose()
    }

    fn store(&self, config: &DeviceConfig) -> Result<(), CollaboratorError> {
        let encoded = encode(config)?;
        let mut bytes = self
            .bytes
            .write()
            .map_err(|_| CollaboratorError::internal("config lock poisoned"))?;
        *bytes = Some(encoded);
        Ok(())
    }
}

/// File-backed configuration store.
///
/// Writes go to a sibling temp file first and land with an atomic rename,
/// so a crash mid-write never leaves a truncated configuration behind.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    /// Creates a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut path = self.path.clone();
        path.as_mut_os_string().push(".tmp");
        path
    }
}

impl DeviceConfigStore for FileConfigStore {
    fn load(&self) -> Result<Option<DeviceConfig>, CollaboratorError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => decode(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CollaboratorError::internal(format!(
                "config read failed ({}): {e}",
                self.path.display()
            ))),
        }
    }

    fn store(&self, config: &DeviceConfig) -> Result<(), CollaboratorError> {
        let encoded = encode(config)?;
        let temp = self.temp_path();
        std::fs::write(&temp, encoded).map_err(|e| {
            CollaboratorError::internal(format!("config write failed ({}): {e}", temp.display()))
        })?;
        std::fs::rename(&temp, &self.path).map_err(|e| {
            CollaboratorError::internal(format!(
                "config rename failed ({}): {e}",
                self.path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_starts_empty() {
        let store = MemoryConfigStore::new();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryConfigStore::new();
        let config = DeviceConfig {
            account_id: Some(AccountId::new([3; 16])),
            username: Some("alice".to_string()),
            salt: Some(Salt::from_bytes(vec![7; 16])),
            device: None,
        };

        store.store(&config).unwrap();
        assert_eq!(store.load().unwrap(), Some(config));

        store.clear();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_record_helpers_preserve_other_fields() {
        let store = MemoryConfigStore::new();
        let account_id = AccountId::new([1; 16]);
        let salt = Salt::from_bytes(vec![9; 16]);

        store.record_account(&account_id, "alice", &salt).unwrap();

        let config = store.load().unwrap().unwrap();
        assert_eq!(config.account_id, Some(account_id));
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.salt, Some(salt));
        assert_eq!(config.device, None);
    }

    #[test]
    fn test_file_store_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("config.bin"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        let store = FileConfigStore::new(&path);

        let config = DeviceConfig {
            account_id: Some(AccountId::new([8; 16])),
            username: Some("bob".to_string()),
            salt: Some(Salt::from_bytes(vec![4; 16])),
            device: None,
        };
        store.store(&config).unwrap();

        // No temp file left behind after the rename.
        assert!(!store.temp_path().exists());

        let reloaded = FileConfigStore::new(&path);
        assert_eq!(reloaded.load().unwrap(), Some(config));
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        std::fs::write(&path, b"definitely not bincode").unwrap();

        let store = FileConfigStore::new(&path);
        assert!(store.load().is_err());
    }
}

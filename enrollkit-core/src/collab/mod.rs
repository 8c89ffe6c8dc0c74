//! Collaborator seams for the signup engine.
//!
//! The engine never talks to the outside world directly. Every external
//! effect goes through one of six narrow traits, so embedders can swap
//! transports and tests can swap fakes per seam:
//!
//! - [`SecretStretcher`]: passphrase stretching (CPU-bound, synchronous)
//! - [`AccountJoinService`]: account creation and invite requests
//! - [`AccountLoader`]: account record fetches
//! - [`DeviceRegistrar`]: device key creation and sealing
//! - [`DeterministicKeyGenerator`]: deterministic subkey derivation
//! - [`ExternalKeyImporter`]: optional key import from an external keyring
//!
//! [`Collaborators`] bundles one implementation of each seam; the
//! [`memory`] module provides an in-memory bundle with call recording.

pub mod detkey;
pub mod directory;
pub mod importer;
pub mod memory;
pub mod registrar;
pub mod stretcher;

pub use detkey::{DeterministicKeyGenerator, HkdfKeyGenerator};
pub use directory::{
    AccountJoinService, AccountLoader, JoinRequest, KeyAnnouncer, RemoteDirectory,
};
pub use importer::{ExternalKeyImporter, NoKeyringImporter};
pub use memory::{CallLog, CollabCall, MemoryCollaborators};
pub use registrar::{
    DeviceRecord, DeviceRegistrar, DeviceSigningKey, SealedDeviceKey, SealedDeviceRegistrar,
};
pub use stretcher::{Argon2Stretcher, SecretStretcher};

/// One implementation of each collaborator seam.
///
/// The engine is generic over a bundle rather than six separate type
/// parameters; accessors borrow from the bundle so implementations decide
/// how the collaborators are shared.
pub trait Collaborators: Send + Sync {
    /// The secret stretcher implementation.
    type Stretcher: SecretStretcher + 'static;
    /// The account join service implementation.
    type Join: AccountJoinService + 'static;
    /// The account loader implementation.
    type Loader: AccountLoader + 'static;
    /// The device registrar implementation.
    type Registrar: DeviceRegistrar + 'static;
    /// The deterministic key generator implementation.
    type KeyGen: DeterministicKeyGenerator + 'static;
    /// The external key importer implementation.
    type Importer: ExternalKeyImporter + 'static;

    /// Returns the secret stretcher.
    fn stretcher(&self) -> &Self::Stretcher;

    /// Returns the account join service.
    fn join_service(&self) -> &Self::Join;

    /// Returns the account loader.
    fn loader(&self) -> &Self::Loader;

    /// Returns the device registrar.
    fn registrar(&self) -> &Self::Registrar;

    /// Returns the deterministic key generator.
    fn key_generator(&self) -> &Self::KeyGen;

    /// Returns the external key importer.
    fn importer(&self) -> &Self::Importer;
}

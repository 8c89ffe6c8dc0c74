//! External key import.
//!
//! Embedders with an external keyring (GPG or similar) implement
//! [`ExternalKeyImporter`] to bring an existing key onto the new account.
//! The whole interaction, including asking the user whether they want the
//! import at all, belongs to the importer; the orchestrator only decides
//! whether to consult it.

use async_trait::async_trait;

use crate::collab::registrar::DeviceSigningKey;
use crate::context::RunContext;
use crate::error::CollaboratorError;
use crate::types::AccountRecord;

/// Imports a key from an external keyring onto the account.
#[async_trait]
pub trait ExternalKeyImporter: Send + Sync {
    /// Asks whether an import should happen. Implementations typically
    /// check for a usable keyring and prompt the user.
    ///
    /// # Errors
    ///
    /// Returns an error if the decision itself fails, for example because
    /// the keyring is unreadable.
    async fn wants_import(&self, ctx: &RunContext) -> Result<bool, CollaboratorError>;

    /// Performs the import, announcing the key signed by `signer` when one
    /// is available. `allow_multiple` permits selecting among several
    /// keyring entries.
    ///
    /// Returns the imported key when its secret half is locally usable, so
    /// the caller can fall back to it as a signing key.
    ///
    /// # Errors
    ///
    /// Returns an error if selection, import or announcement fails.
    async fn import(
        &self,
        ctx: &RunContext,
        signer: Option<&DeviceSigningKey>,
        record: &AccountRecord,
        allow_multiple: bool,
    ) -> Result<Option<DeviceSigningKey>, CollaboratorError>;
}

/// Importer for embedders without any external keyring.
///
/// Never wants an import; `import` failing is a wiring bug, not a user
/// condition.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKeyringImporter;

impl NoKeyringImporter {
    /// Creates the importer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExternalKeyImporter for NoKeyringImporter {
    async fn wants_import(&self, ctx: &RunContext) -> Result<bool, CollaboratorError> {
        ctx.ensure_active()?;
        Ok(false)
    }

    async fn import(
        &self,
        _ctx: &RunContext,
        _signer: Option<&DeviceSigningKey>,
        _record: &AccountRecord,
        _allow_multiple: bool,
    ) -> Result<Option<DeviceSigningKey>, CollaboratorError> {
        Err(CollaboratorError::internal(
            "no external keyring is available",
        ))
    }
}

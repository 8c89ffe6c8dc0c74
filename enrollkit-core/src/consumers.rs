//! Static capability descriptors for the collaborators a signup drives.
//!
//! Embedders can inspect these before starting a run to verify they can
//! satisfy every interaction a collaborator may ask for. The descriptors
//! are plain constants: querying them never constructs a collaborator and
//! never requires real arguments.

use strum::Display;

/// An interaction capability a collaborator may require from the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum InteractionCapability {
    /// Prompting the user for a secret value.
    SecretEntry,
    /// Reading from an external keyring.
    KeyringAccess,
    /// Asking the user a yes/no question.
    Confirmation,
}

/// Statically-known description of one collaborator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerDescriptor {
    /// Stable name of the collaborator kind.
    pub name: &'static str,
    /// Interaction capabilities this collaborator may ask for.
    pub capabilities: &'static [InteractionCapability],
}

/// The downstream collaborators a signup run may invoke.
///
/// The registrar and the key generator run without interaction; only the
/// external key importer may need to reach a keyring and ask the user
/// whether to proceed.
pub const SUB_CONSUMERS: [ConsumerDescriptor; 3] = [
    ConsumerDescriptor {
        name: "device_registrar",
        capabilities: &[],
    },
    ConsumerDescriptor {
        name: "deterministic_key_generator",
        capabilities: &[],
    },
    ConsumerDescriptor {
        name: "external_key_importer",
        capabilities: &[
            InteractionCapability::KeyringAccess,
            InteractionCapability::Confirmation,
        ],
    },
];

/// Interactive capabilities the orchestrator itself requires: none.
///
/// All interaction needs surface transitively through [`SUB_CONSUMERS`].
pub const REQUIRED_UIS: &[InteractionCapability] = &[];

/// Preconditions a caller must establish before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Prereqs {
    /// Whether an existing account is required.
    pub needs_account: bool,
    /// Whether an existing registered device is required.
    pub needs_device: bool,
}

/// The orchestrator's preconditions: none, signup creates both the account
/// and the device.
pub const PREREQS: Prereqs = Prereqs {
    needs_account: false,
    needs_device: false,
};

//! Error types for the signup engine.
//!
//! Two layers: [`CollaboratorError`] is the currency of every collaborator
//! contract (stretcher, directory, registrar, key generator, importer,
//! config store), while [`SignupError`] is what the orchestrator returns,
//! tagging each collaborator failure with the stage that produced it and
//! carrying the inner error verbatim.

use std::fmt;

use strum::Display;
use thiserror::Error;

use crate::types::AccountId;

/// Errors raised by collaborator implementations.
///
/// Collaborators are free to describe their failures however they want
/// within these shapes; the orchestrator never rewrites them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// A network call failed or returned a non-success status.
    Network {
        /// URL of the failed request.
        url: String,
        /// HTTP status code, when a response was received.
        status: Option<u16>,
        /// Description of the failure (response body or transport error).
        message: String,
    },

    /// The service rejected an input value.
    Validation {
        /// Name of the rejected field.
        field: String,
        /// Description of the rejection.
        reason: String,
    },

    /// A referenced entity does not exist.
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// A cryptographic operation failed.
    Crypto {
        /// Context describing the operation.
        context: String,
    },

    /// The run context was cancelled or its deadline passed.
    Cancelled {
        /// Why the call did not proceed.
        reason: String,
    },

    /// The user declined an interactive step.
    Declined,

    /// An unexpected internal failure.
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl CollaboratorError {
    /// Creates a network error.
    #[must_use]
    pub fn network(
        url: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Network {
            url: url.into(),
            status,
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a crypto error.
    #[must_use]
    pub fn crypto(context: impl Into<String>) -> Self {
        Self::Crypto {
            context: context.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network {
                url,
                status,
                message,
            } => match status {
                Some(code) => write!(f, "network error ({url}, status {code}): {message}"),
                None => write!(f, "network error ({url}): {message}"),
            },
            Self::Validation { field, reason } => {
                write!(f, "invalid {field}: {reason}")
            }
            Self::NotFound { what } => write!(f, "not found: {what}"),
            Self::Crypto { context } => write!(f, "crypto failure: {context}"),
            Self::Cancelled { reason } => write!(f, "cancelled: {reason}"),
            Self::Declined => write!(f, "declined by user"),
            Self::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for CollaboratorError {}

/// The signup stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Passphrase stretching.
    Stretch,
    /// Remote account join.
    Join,
    /// Account record load after join.
    LoadRecord,
    /// Device key registration.
    RegisterDevice,
    /// Deterministic key generation.
    GenerateKeys,
    /// External key import.
    Import,
}

/// Errors returned by the signup engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignupError {
    /// No device configuration exists yet.
    #[error("no device configuration available")]
    ConfigMissing,

    /// The device configuration already carries an account.
    #[error("already registered as account {account_id}")]
    AlreadyRegistered {
        /// The account this device is already registered to.
        account_id: AccountId,
    },

    /// A run argument failed validation; no stage was attempted.
    #[error("invalid signup arguments: {field} {reason}")]
    InvalidArguments {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// This engine instance has already driven a run.
    ///
    /// One engine instance corresponds to one signup attempt; construct a
    /// fresh engine to retry.
    #[error("signup engine has already run")]
    RunConsumed,

    /// Passphrase stretching failed.
    #[error("stretch failed: {0}")]
    Stretch(#[source] CollaboratorError),

    /// The remote join call failed.
    #[error("join failed: {0}")]
    Join(#[source] CollaboratorError),

    /// Loading the account record after join failed.
    #[error("load_record failed: {0}")]
    LoadRecord(#[source] CollaboratorError),

    /// Device registration failed.
    #[error("register_device failed: {0}")]
    RegisterDevice(#[source] CollaboratorError),

    /// Deterministic key generation failed.
    #[error("generate_keys failed: {0}")]
    GenerateKeys(#[source] CollaboratorError),

    /// External key import failed.
    #[error("import failed: {0}")]
    Import(#[source] CollaboratorError),

    /// Reading or writing the device configuration failed.
    #[error("device configuration failed: {0}")]
    Config(#[source] CollaboratorError),
}

impl SignupError {
    /// Returns the stage this error is attributed to, if it is a stage error.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stretch(_) => Some(Stage::Stretch),
            Self::Join(_) => Some(Stage::Join),
            Self::LoadRecord(_) => Some(Stage::LoadRecord),
            Self::RegisterDevice(_) => Some(Stage::RegisterDevice),
            Self::GenerateKeys(_) => Some(Stage::GenerateKeys),
            Self::Import(_) => Some(Stage::Import),
            _ => None,
        }
    }

    /// Returns the collaborator error carried by this error, unmodified.
    #[must_use]
    pub const fn collaborator_error(&self) -> Option<&CollaboratorError> {
        match self {
            Self::Stretch(e)
            | Self::Join(e)
            | Self::LoadRecord(e)
            | Self::RegisterDevice(e)
            | Self::GenerateKeys(e)
            | Self::Import(e)
            | Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_display() {
        let err = CollaboratorError::network("https://svc.test/join", Some(503), "unavailable");
        assert_eq!(
            err.to_string(),
            "network error (https://svc.test/join, status 503): unavailable"
        );

        let err = CollaboratorError::validation("username", "taken");
        assert_eq!(err.to_string(), "invalid username: taken");
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Stretch.to_string(), "stretch");
        assert_eq!(Stage::RegisterDevice.to_string(), "register_device");
    }

    #[test]
    fn test_stage_error_carries_inner_verbatim() {
        let inner = CollaboratorError::crypto("argon2 rejected salt");
        let err = SignupError::Stretch(inner.clone());

        assert_eq!(err.stage(), Some(Stage::Stretch));
        assert_eq!(err.collaborator_error(), Some(&inner));
        assert!(err.to_string().contains("argon2 rejected salt"));
    }

    #[test]
    fn test_precondition_errors_have_no_stage() {
        assert_eq!(SignupError::ConfigMissing.stage(), None);
        let err = SignupError::AlreadyRegistered {
            account_id: AccountId::new([9; 16]),
        };
        assert_eq!(err.stage(), None);
        assert!(err.to_string().contains(&AccountId::new([9; 16]).to_hex()));
    }
}

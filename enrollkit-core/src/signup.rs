//! The signup orchestrator.
//!
//! [`SignupEngine`] drives one account signup from credentials to a
//! provisioned device: stretch the passphrase, join the account, register
//! the first device, derive the deterministic subkeys and optionally offer
//! an external key import. Each stage is a collaborator behind a trait on
//! the injected [`Collaborators`] bundle; the engine owns only the order,
//! the accumulated run state and the error attribution.
//!
//! A failure at any stage aborts the remaining stages. There is no retry
//! and no rollback: a joined account whose later stages failed stays
//! joined on the service, and the embedder decides how to resume.

use std::sync::Arc;

use crate::collab::directory::JoinRequest;
use crate::collab::registrar::DeviceSigningKey;
use crate::collab::{
    AccountJoinService, AccountLoader, Collaborators, DeterministicKeyGenerator, DeviceRegistrar,
    ExternalKeyImporter, SecretStretcher,
};
use crate::config::DeviceConfigStore;
use crate::consumers::{
    ConsumerDescriptor, InteractionCapability, Prereqs, PREREQS, REQUIRED_UIS, SUB_CONSUMERS,
};
use crate::context::RunContext;
use crate::error::{CollaboratorError, SignupError, Stage};
use crate::logger::{LogHandle, LogLevel};
use crate::secret::{Passphrase, Salt};
use crate::types::{AccountId, AccountRecord, InviteRequest};

/// Everything a signup run needs from the caller.
#[derive(Debug)]
pub struct RunArguments {
    /// Username for the new account.
    pub username: String,
    /// Contact email for the new account.
    pub email: String,
    /// Invitation code, when the service requires one. May be empty.
    pub invite_code: String,
    /// The user's passphrase. Consumed by the run, never logged and never
    /// persisted.
    pub passphrase: Passphrase,
    /// Human-readable name for the device being registered.
    pub device_name: String,
    /// Skip the external key import stage entirely.
    pub skip_key_import: bool,
    /// Ask the service not to send a welcome mail.
    pub skip_mail: bool,
}

impl RunArguments {
    fn validate(&self) -> Result<(), SignupError> {
        if self.username.is_empty() {
            return Err(SignupError::InvalidArguments {
                field: "username",
                reason: "must not be empty",
            });
        }
        if self.passphrase.is_empty() {
            return Err(SignupError::InvalidArguments {
                field: "passphrase",
                reason: "must not be empty",
            });
        }
        if self.device_name.is_empty() {
            return Err(SignupError::InvalidArguments {
                field: "device_name",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// Progress of a signup run.
///
/// Phases advance strictly in order. A failure at any stage moves the
/// engine to [`Phase::Failed`] and the remaining stages never run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No run has started.
    Init,
    /// The passphrase has been stretched.
    Stretched,
    /// The account exists on the service and its record is loaded.
    Joined,
    /// The device and its signing key are registered.
    DeviceRegistered,
    /// Deterministic subkeys are derived and announced.
    KeysGenerated,
    /// The external key import stage ran (wanted or not).
    ImportChecked,
    /// The run finished successfully.
    Done,
    /// The run aborted; the failing stage is carried by the returned error.
    Failed,
}

/// Drives a signup attempt from credentials to a provisioned device.
///
/// One engine instance corresponds to one attempt: construct it, optionally
/// consult [`Self::check_registered`], then call [`Self::run`] once. After
/// the run the embedder inspects the accumulated state through
/// [`Self::account_id`], [`Self::account_record`] and [`Self::signing_key`].
///
/// The collaborator bundle, the device configuration store and the log sink
/// are all injected at construction; the engine reaches for no globals.
pub struct SignupEngine<C, S> {
    collaborators: Arc<C>,
    config: Arc<S>,
    logger: LogHandle,
    phase: Phase,
    salt: Option<Salt>,
    account_id: Option<AccountId>,
    record: Option<AccountRecord>,
    signing_key: Option<DeviceSigningKey>,
}

impl<C, S> SignupEngine<C, S>
where
    C: Collaborators,
    S: DeviceConfigStore,
{
    /// Creates an engine ready to drive one signup attempt.
    #[must_use]
    pub fn new(collaborators: Arc<C>, config: Arc<S>, logger: LogHandle) -> Self {
        Self {
            collaborators,
            config,
            logger,
            phase: Phase::Init,
            salt: None,
            account_id: None,
            record: None,
            signing_key: None,
        }
    }

    /// Current phase of the run.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The account identifier assigned at join, once the join stage passed.
    #[must_use]
    pub const fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    /// The account record loaded after join.
    #[must_use]
    pub const fn account_record(&self) -> Option<&AccountRecord> {
        self.record.as_ref()
    }

    /// The device signing key held by this run, from registration or import.
    #[must_use]
    pub const fn signing_key(&self) -> Option<&DeviceSigningKey> {
        self.signing_key.as_ref()
    }

    /// The salt this run stretched the passphrase with.
    #[must_use]
    pub const fn salt(&self) -> Option<&Salt> {
        self.salt.as_ref()
    }

    /// The collaborators a run may invoke, with their interaction needs.
    ///
    /// Metadata only: nothing is constructed and no collaborator is touched.
    #[must_use]
    pub const fn sub_consumers() -> &'static [ConsumerDescriptor] {
        &SUB_CONSUMERS
    }

    /// Interactive capabilities the orchestrator itself requires: none.
    #[must_use]
    pub const fn required_uis() -> &'static [InteractionCapability] {
        REQUIRED_UIS
    }

    /// Preconditions beyond what [`Self::check_registered`] enforces: none.
    #[must_use]
    pub const fn prereqs() -> Prereqs {
        PREREQS
    }

    /// Checks whether this device can attempt a signup.
    ///
    /// Reads the device configuration and nothing else; no collaborator is
    /// touched and no state changes.
    ///
    /// # Errors
    /// - [`SignupError::ConfigMissing`] when no configuration exists.
    /// - [`SignupError::AlreadyRegistered`] carrying the existing account
    ///   identifier when the configuration already names an account.
    /// - [`SignupError::Config`] when the configuration cannot be read.
    pub fn check_registered(&self) -> Result<(), SignupError> {
        self.debug("check_registered");
        let Some(config) = self.config.load().map_err(SignupError::Config)? else {
            return Err(SignupError::ConfigMissing);
        };
        if let Some(account_id) = config.account_id {
            self.debug(format!("already registered as {account_id}"));
            return Err(SignupError::AlreadyRegistered { account_id });
        }
        Ok(())
    }

    /// Asks the service for a signup invitation.
    ///
    /// Pure pass-through to the join service; independent of any run.
    ///
    /// # Errors
    /// Returns the service's error unmodified.
    pub async fn post_invite_request(
        &self,
        ctx: &RunContext,
        request: &InviteRequest,
    ) -> Result<(), CollaboratorError> {
        self.collaborators
            .join_service()
            .request_invite(ctx, request)
            .await
    }

    /// Runs the signup stages in order.
    ///
    /// Stages: stretch the passphrase with a fresh salt, join the account
    /// and load its record, register the device, derive the deterministic
    /// subkeys, then (unless `skip_key_import` is set) offer the external
    /// key importer a turn. The first failure aborts the remaining stages
    /// and is returned tagged with its stage, the collaborator's error
    /// unmodified inside.
    ///
    /// # Errors
    /// - [`SignupError::RunConsumed`] when this instance already ran.
    /// - [`SignupError::InvalidArguments`] when an argument fails
    ///   validation; no stage has run and the instance stays fresh.
    /// - A stage-tagged error when a collaborator or the configuration
    ///   store fails.
    pub async fn run(&mut self, ctx: &RunContext, args: RunArguments) -> Result<(), SignupError> {
        if self.phase != Phase::Init {
            return Err(SignupError::RunConsumed);
        }
        args.validate()?;
        self.debug(format!("signup run starting for {}", args.username));

        let result = self.drive(ctx, args).await;
        if let Err(err) = &result {
            self.phase = Phase::Failed;
            self.logger
                .log(LogLevel::Error, format!("signup run failed: {err}"));
            return result;
        }
        self.phase = Phase::Done;
        self.logger
            .log(LogLevel::Info, "signup run complete".to_string());
        result
    }

    async fn drive(&mut self, ctx: &RunContext, args: RunArguments) -> Result<(), SignupError> {
        self.debug(format!("stage {}", Stage::Stretch));
        let salt =
            Salt::random(self.collaborators.stretcher().salt_len()).map_err(SignupError::Stretch)?;
        let stretched = self
            .collaborators
            .stretcher()
            .stretch(ctx, &args.passphrase, &salt)
            .map_err(SignupError::Stretch)?;
        self.salt = Some(salt.clone());
        self.phase = Phase::Stretched;

        self.debug(format!("stage {}", Stage::Join));
        let join_request = JoinRequest {
            username: args.username.clone(),
            email: args.email,
            invite_code: args.invite_code,
            password_hash: *stretched.password_hash(),
            salt: salt.clone(),
            skip_mail: args.skip_mail,
        };
        let account_id = self
            .collaborators
            .join_service()
            .join(ctx, join_request)
            .await
            .map_err(SignupError::Join)?;
        self.debug(format!("stage {}", Stage::LoadRecord));
        let record = self
            .collaborators
            .loader()
            .load_record(ctx, &account_id)
            .await
            .map_err(SignupError::LoadRecord)?;
        self.config
            .record_account(&account_id, &args.username, &salt)
            .map_err(SignupError::Config)?;
        self.account_id = Some(account_id);
        self.record = Some(record.clone());
        self.phase = Phase::Joined;

        self.debug(format!("stage {}", Stage::RegisterDevice));
        self.signing_key = self
            .collaborators
            .registrar()
            .register(ctx, &args.device_name, stretched.client_half(), &record)
            .await
            .map_err(SignupError::RegisterDevice)?;
        self.phase = Phase::DeviceRegistered;

        self.debug(format!("stage {}", Stage::GenerateKeys));
        self.collaborators
            .key_generator()
            .generate(ctx, &record, self.signing_key.as_ref(), &stretched)
            .await
            .map_err(SignupError::GenerateKeys)?;
        self.phase = Phase::KeysGenerated;

        if args.skip_key_import {
            self.debug("key import skipped by request");
            return Ok(());
        }
        self.debug(format!("stage {}", Stage::Import));
        let wants = self
            .collaborators
            .importer()
            .wants_import(ctx)
            .await
            .map_err(SignupError::Import)?;
        if wants {
            let imported = self
                .collaborators
                .importer()
                .import(ctx, self.signing_key.as_ref(), &record, true)
                .await
                .map_err(SignupError::Import)?;
            // An imported key never replaces one the registrar produced.
            if self.signing_key.is_none() {
                self.signing_key = imported;
            }
        }
        self.phase = Phase::ImportChecked;
        Ok(())
    }

    fn debug(&self, message: impl Into<String>) {
        self.logger.log(LogLevel::Debug, message.into());
    }
}

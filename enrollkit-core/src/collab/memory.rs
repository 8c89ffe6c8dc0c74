//! In-memory collaborators for testing.
//!
//! Nothing here is secure for production use. These fakes exist so engine
//! behavior (stage ordering, short-circuiting, error pass-through) can be
//! tested without network or real key derivation.
//!
//! All fakes share a [`CallLog`] recording the order of collaborator
//! invocations, and each can be scripted to fail with a chosen error.

// Relax a few clippy lints for test-oriented code
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::collab::detkey::DeterministicKeyGenerator;
use crate::collab::directory::{AccountJoinService, AccountLoader, JoinRequest, KeyAnnouncer};
use crate::collab::importer::ExternalKeyImporter;
use crate::collab::registrar::{DeviceRegistrar, DeviceSigningKey};
use crate::collab::stretcher::SecretStretcher;
use crate::collab::Collaborators;
use crate::context::RunContext;
use crate::error::CollaboratorError;
use crate::secret::{Passphrase, Salt, StretchedSecret};
use crate::types::{AccountId, AccountRecord, InviteRequest, KeyId, PublicKeyInfo};

/// Salt length the fake stretcher asks for.
const FAKE_SALT_LEN: usize = 16;

// =============================================================================
// Call Log
// =============================================================================

/// One collaborator invocation, as seen from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollabCall {
    /// The secret stretcher ran.
    Stretch,
    /// The join service created an account.
    Join,
    /// The account loader fetched a record.
    LoadRecord,
    /// The device registrar ran.
    RegisterDevice,
    /// The deterministic key generator ran.
    GenerateKeys,
    /// The importer was asked whether it wants an import.
    WantsImport,
    /// The importer performed an import.
    Import,
}

/// Shared, ordered record of collaborator invocations.
///
/// Clones share the same underlying log.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<CollabCall>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call.
    pub fn record(&self, call: CollabCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Returns the calls recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CollabCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns `true` if the given call was recorded at least once.
    #[must_use]
    pub fn contains(&self, call: CollabCall) -> bool {
        self.calls.lock().unwrap().contains(&call)
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

// =============================================================================
// Fake Stretcher
// =============================================================================

/// Deterministic SHA256-based stretcher.
///
/// Fast and reproducible: the same (passphrase, salt) pair always yields
/// the same output, like the real stretcher but without the cost.
#[derive(Debug)]
pub struct FakeStretcher {
    log: CallLog,
    salts_seen: Mutex<Vec<Salt>>,
    failure: Mutex<Option<CollaboratorError>>,
}

impl FakeStretcher {
    /// Creates a stretcher recording into the given log.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            salts_seen: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    /// Makes every subsequent stretch fail with the given error.
    pub fn fail_with(&self, err: CollaboratorError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// Returns every salt passed to `stretch`, in order.
    #[must_use]
    pub fn salts_seen(&self) -> Vec<Salt> {
        self.salts_seen.lock().unwrap().clone()
    }
}

impl SecretStretcher for FakeStretcher {
    fn salt_len(&self) -> usize {
        FAKE_SALT_LEN
    }

    fn stretch(
        &self,
        ctx: &RunContext,
        passphrase: &Passphrase,
        salt: &Salt,
    ) -> Result<StretchedSecret, CollaboratorError> {
        self.log.record(CollabCall::Stretch);
        ctx.ensure_active()?;
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.salts_seen.lock().unwrap().push(salt.clone());

        let password_hash = labelled_digest(b"memory-stretch:server", passphrase, salt);
        let client_half = labelled_digest(b"memory-stretch:client", passphrase, salt);
        Ok(StretchedSecret::new(password_hash, client_half))
    }
}

fn labelled_digest(label: &[u8], passphrase: &Passphrase, salt: &Salt) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(passphrase.expose().as_bytes());
    hasher.update(salt.as_bytes());
    hasher.finalize().into()
}

// =============================================================================
// Memory Directory
// =============================================================================

/// In-memory directory implementing join, load and announce.
///
/// Usernames are unique; account identifiers are assigned from a counter so
/// tests can predict them. Announced keys become visible to later record
/// loads, as they do against the real service.
#[derive(Debug)]
pub struct MemoryDirectory {
    log: CallLog,
    accounts: RwLock<HashMap<AccountId, AccountRecord>>,
    join_requests: Mutex<Vec<JoinRequest>>,
    invites: Mutex<Vec<InviteRequest>>,
    next_account: Mutex<u128>,
    join_failure: Mutex<Option<CollaboratorError>>,
    load_failure: Mutex<Option<CollaboratorError>>,
    announce_failure: Mutex<Option<CollaboratorError>>,
    invite_failure: Mutex<Option<CollaboratorError>>,
}

impl MemoryDirectory {
    /// Creates a directory recording into the given log.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            accounts: RwLock::new(HashMap::new()),
            join_requests: Mutex::new(Vec::new()),
            invites: Mutex::new(Vec::new()),
            next_account: Mutex::new(0),
            join_failure: Mutex::new(None),
            load_failure: Mutex::new(None),
            announce_failure: Mutex::new(None),
            invite_failure: Mutex::new(None),
        }
    }

    /// Makes every subsequent join fail with the given error.
    pub fn fail_join_with(&self, err: CollaboratorError) {
        *self.join_failure.lock().unwrap() = Some(err);
    }

    /// Makes every subsequent record load fail with the given error.
    pub fn fail_load_with(&self, err: CollaboratorError) {
        *self.load_failure.lock().unwrap() = Some(err);
    }

    /// Makes every subsequent key announcement fail with the given error.
    pub fn fail_announce_with(&self, err: CollaboratorError) {
        *self.announce_failure.lock().unwrap() = Some(err);
    }

    /// Makes every subsequent invite request fail with the given error.
    pub fn fail_invite_with(&self, err: CollaboratorError) {
        *self.invite_failure.lock().unwrap() = Some(err);
    }

    /// Returns the stored record for an account, if any.
    #[must_use]
    pub fn account(&self, account_id: &AccountId) -> Option<AccountRecord> {
        self.accounts.read().unwrap().get(account_id).cloned()
    }

    /// Returns every join request received, in order.
    #[must_use]
    pub fn join_requests(&self) -> Vec<JoinRequest> {
        self.join_requests.lock().unwrap().clone()
    }

    /// Returns every invite request received, in order.
    #[must_use]
    pub fn invites(&self) -> Vec<InviteRequest> {
        self.invites.lock().unwrap().clone()
    }

    fn next_account_id(&self) -> AccountId {
        let mut counter = self.next_account.lock().unwrap();
        *counter += 1;
        AccountId::new(counter.to_be_bytes())
    }
}

#[async_trait]
impl AccountJoinService for MemoryDirectory {
    async fn join(
        &self,
        ctx: &RunContext,
        request: JoinRequest,
    ) -> Result<AccountId, CollaboratorError> {
        self.log.record(CollabCall::Join);
        ctx.ensure_active()?;
        if let Some(err) = self.join_failure.lock().unwrap().clone() {
            return Err(err);
        }

        let mut accounts = self.accounts.write().unwrap();
        if accounts.values().any(|r| r.username == request.username) {
            return Err(CollaboratorError::validation("username", "already taken"));
        }

        let account_id = self.next_account_id();
        accounts.insert(
            account_id,
            AccountRecord {
                account_id,
                username: request.username.clone(),
                public_keys: vec![],
            },
        );
        drop(accounts);

        self.join_requests.lock().unwrap().push(request);
        Ok(account_id)
    }

    async fn request_invite(
        &self,
        ctx: &RunContext,
        request: &InviteRequest,
    ) -> Result<(), CollaboratorError> {
        ctx.ensure_active()?;
        if let Some(err) = self.invite_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.invites.lock().unwrap().push(request.clone());
        Ok(())
    }
}

#[async_trait]
impl AccountLoader for MemoryDirectory {
    async fn load_record(
        &self,
        ctx: &RunContext,
        account_id: &AccountId,
    ) -> Result<AccountRecord, CollaboratorError> {
        self.log.record(CollabCall::LoadRecord);
        ctx.ensure_active()?;
        if let Some(err) = self.load_failure.lock().unwrap().clone() {
            return Err(err);
        }

        self.accounts
            .read()
            .unwrap()
            .get(account_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::not_found(format!("account {account_id}")))
    }
}

#[async_trait]
impl KeyAnnouncer for MemoryDirectory {
    async fn announce_key(
        &self,
        ctx: &RunContext,
        account_id: &AccountId,
        key: &PublicKeyInfo,
        _signed_by: &KeyId,
        _signature: Vec<u8>,
    ) -> Result<(), CollaboratorError> {
        ctx.ensure_active()?;
        if let Some(err) = self.announce_failure.lock().unwrap().clone() {
            return Err(err);
        }

        let mut accounts = self.accounts.write().unwrap();
        let record = accounts
            .get_mut(account_id)
            .ok_or_else(|| CollaboratorError::not_found(format!("account {account_id}")))?;
        record.public_keys.push(key.clone());
        Ok(())
    }
}

// =============================================================================
// Fake Registrar
// =============================================================================

/// Registrar returning a freshly generated key, or no key when scripted.
#[derive(Debug)]
pub struct FakeRegistrar {
    log: CallLog,
    return_key: Mutex<bool>,
    failure: Mutex<Option<CollaboratorError>>,
    last_device_name: Mutex<Option<String>>,
    last_client_half: Mutex<Option<[u8; 32]>>,
}

impl FakeRegistrar {
    /// Creates a registrar recording into the given log.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            return_key: Mutex::new(true),
            failure: Mutex::new(None),
            last_device_name: Mutex::new(None),
            last_client_half: Mutex::new(None),
        }
    }

    /// Makes subsequent registrations succeed without returning a key.
    pub fn yield_no_key(&self) {
        *self.return_key.lock().unwrap() = false;
    }

    /// Makes every subsequent registration fail with the given error.
    pub fn fail_with(&self, err: CollaboratorError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// Returns the device name from the most recent registration.
    #[must_use]
    pub fn last_device_name(&self) -> Option<String> {
        self.last_device_name.lock().unwrap().clone()
    }

    /// Returns the client half from the most recent registration.
    #[must_use]
    pub fn last_client_half(&self) -> Option<[u8; 32]> {
        *self.last_client_half.lock().unwrap()
    }
}

#[async_trait]
impl DeviceRegistrar for FakeRegistrar {
    async fn register(
        &self,
        ctx: &RunContext,
        device_name: &str,
        client_half: &[u8; 32],
        _record: &AccountRecord,
    ) -> Result<Option<DeviceSigningKey>, CollaboratorError> {
        self.log.record(CollabCall::RegisterDevice);
        ctx.ensure_active()?;
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        *self.last_device_name.lock().unwrap() = Some(device_name.to_string());
        *self.last_client_half.lock().unwrap() = Some(*client_half);

        if *self.return_key.lock().unwrap() {
            Ok(Some(DeviceSigningKey::generate()))
        } else {
            Ok(None)
        }
    }
}

// =============================================================================
// Fake Key Generator
// =============================================================================

/// Key generator that only records it ran.
#[derive(Debug)]
pub struct FakeKeyGenerator {
    log: CallLog,
    failure: Mutex<Option<CollaboratorError>>,
    saw_device_key: Mutex<Option<bool>>,
}

impl FakeKeyGenerator {
    /// Creates a generator recording into the given log.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failure: Mutex::new(None),
            saw_device_key: Mutex::new(None),
        }
    }

    /// Makes every subsequent generation fail with the given error.
    pub fn fail_with(&self, err: CollaboratorError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// Returns whether the most recent call received a device key.
    #[must_use]
    pub fn saw_device_key(&self) -> Option<bool> {
        *self.saw_device_key.lock().unwrap()
    }
}

#[async_trait]
impl DeterministicKeyGenerator for FakeKeyGenerator {
    async fn generate(
        &self,
        ctx: &RunContext,
        _record: &AccountRecord,
        device_key: Option<&DeviceSigningKey>,
        _stretched: &StretchedSecret,
    ) -> Result<(), CollaboratorError> {
        self.log.record(CollabCall::GenerateKeys);
        ctx.ensure_active()?;
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        *self.saw_device_key.lock().unwrap() = Some(device_key.is_some());
        Ok(())
    }
}

// =============================================================================
// Fake Importer
// =============================================================================

/// Importer with a scriptable decision and import result.
///
/// Defaults to not wanting an import, like an embedder without a keyring.
#[derive(Debug)]
pub struct FakeImporter {
    log: CallLog,
    wants: Mutex<bool>,
    import_result: Mutex<Option<DeviceSigningKey>>,
    wants_failure: Mutex<Option<CollaboratorError>>,
    import_failure: Mutex<Option<CollaboratorError>>,
    last_signer: Mutex<Option<KeyId>>,
    last_allow_multiple: Mutex<Option<bool>>,
}

impl FakeImporter {
    /// Creates an importer recording into the given log.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            wants: Mutex::new(false),
            import_result: Mutex::new(None),
            wants_failure: Mutex::new(None),
            import_failure: Mutex::new(None),
            last_signer: Mutex::new(None),
            last_allow_multiple: Mutex::new(None),
        }
    }

    /// Scripts the answer to `wants_import`.
    pub fn set_wants_import(&self, wants: bool) {
        *self.wants.lock().unwrap() = wants;
    }

    /// Scripts the key that `import` returns.
    pub fn import_yields(&self, key: DeviceSigningKey) {
        *self.import_result.lock().unwrap() = Some(key);
    }

    /// Makes every subsequent `wants_import` fail with the given error.
    pub fn fail_wants_with(&self, err: CollaboratorError) {
        *self.wants_failure.lock().unwrap() = Some(err);
    }

    /// Makes every subsequent `import` fail with the given error.
    pub fn fail_import_with(&self, err: CollaboratorError) {
        *self.import_failure.lock().unwrap() = Some(err);
    }

    /// Returns the fingerprint of the signer passed to the most recent
    /// import, if one was passed.
    #[must_use]
    pub fn last_signer(&self) -> Option<KeyId> {
        *self.last_signer.lock().unwrap()
    }

    /// Returns the allow-multiple flag from the most recent import.
    #[must_use]
    pub fn last_allow_multiple(&self) -> Option<bool> {
        *self.last_allow_multiple.lock().unwrap()
    }
}

#[async_trait]
impl ExternalKeyImporter for FakeImporter {
    async fn wants_import(&self, ctx: &RunContext) -> Result<bool, CollaboratorError> {
        self.log.record(CollabCall::WantsImport);
        ctx.ensure_active()?;
        if let Some(err) = self.wants_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(*self.wants.lock().unwrap())
    }

    async fn import(
        &self,
        ctx: &RunContext,
        signer: Option<&DeviceSigningKey>,
        _record: &AccountRecord,
        allow_multiple: bool,
    ) -> Result<Option<DeviceSigningKey>, CollaboratorError> {
        self.log.record(CollabCall::Import);
        ctx.ensure_active()?;
        if let Some(err) = self.import_failure.lock().unwrap().clone() {
            return Err(err);
        }

        *self.last_signer.lock().unwrap() = signer.map(DeviceSigningKey::key_id);
        *self.last_allow_multiple.lock().unwrap() = Some(allow_multiple);
        Ok(self.import_result.lock().unwrap().clone())
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// In-memory bundle wiring every fake to one shared [`CallLog`].
///
/// The [`Collaborators`] accessors hand back the concrete fakes, so tests
/// script them directly: `bundle.importer().set_wants_import(true)`.
#[derive(Debug)]
pub struct MemoryCollaborators {
    log: CallLog,
    stretcher: FakeStretcher,
    directory: MemoryDirectory,
    registrar: FakeRegistrar,
    key_generator: FakeKeyGenerator,
    importer: FakeImporter,
}

impl MemoryCollaborators {
    /// Creates a bundle with a fresh call log.
    #[must_use]
    pub fn new() -> Self {
        let log = CallLog::new();
        Self {
            stretcher: FakeStretcher::new(log.clone()),
            directory: MemoryDirectory::new(log.clone()),
            registrar: FakeRegistrar::new(log.clone()),
            key_generator: FakeKeyGenerator::new(log.clone()),
            importer: FakeImporter::new(log.clone()),
            log,
        }
    }

    /// Returns the shared call log.
    #[must_use]
    pub fn log(&self) -> &CallLog {
        &self.log
    }
}

impl Default for MemoryCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

impl Collaborators for MemoryCollaborators {
    type Stretcher = FakeStretcher;
    type Join = MemoryDirectory;
    type Loader = MemoryDirectory;
    type Registrar = FakeRegistrar;
    type KeyGen = FakeKeyGenerator;
    type Importer = FakeImporter;

    fn stretcher(&self) -> &FakeStretcher {
        &self.stretcher
    }

    fn join_service(&self) -> &MemoryDirectory {
        &self.directory
    }

    fn loader(&self) -> &MemoryDirectory {
        &self.directory
    }

    fn registrar(&self) -> &FakeRegistrar {
        &self.registrar
    }

    fn key_generator(&self) -> &FakeKeyGenerator {
        &self.key_generator
    }

    fn importer(&self) -> &FakeImporter {
        &self.importer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_join_request(username: &str) -> JoinRequest {
        JoinRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            invite_code: String::new(),
            password_hash: [1u8; 32],
            salt: Salt::from_bytes(vec![2u8; FAKE_SALT_LEN]),
            skip_mail: true,
        }
    }

    #[test]
    fn test_fake_stretcher_is_deterministic() {
        let stretcher = FakeStretcher::new(CallLog::new());
        let ctx = RunContext::background();
        let passphrase = Passphrase::from("correct horse");
        let salt = Salt::from_bytes(vec![3u8; FAKE_SALT_LEN]);

        let first = stretcher.stretch(&ctx, &passphrase, &salt).unwrap();
        let second = stretcher.stretch(&ctx, &passphrase, &salt).unwrap();

        assert_eq!(first.password_hash(), second.password_hash());
        assert_eq!(first.client_half(), second.client_half());
        assert_ne!(first.password_hash(), first.client_half());
        assert_eq!(stretcher.salts_seen().len(), 2);
    }

    #[test]
    fn test_fake_stretcher_scripted_failure() {
        let log = CallLog::new();
        let stretcher = FakeStretcher::new(log.clone());
        stretcher.fail_with(CollaboratorError::crypto("out of memory"));

        let err = stretcher
            .stretch(
                &RunContext::background(),
                &Passphrase::from("pw"),
                &Salt::from_bytes(vec![0u8; FAKE_SALT_LEN]),
            )
            .unwrap_err();

        assert_eq!(err, CollaboratorError::crypto("out of memory"));
        // The attempt is still recorded.
        assert_eq!(log.calls(), vec![CollabCall::Stretch]);
    }

    #[tokio::test]
    async fn test_directory_enforces_username_uniqueness() {
        let directory = MemoryDirectory::new(CallLog::new());
        let ctx = RunContext::background();

        directory.join(&ctx, test_join_request("alice")).await.unwrap();
        let err = directory
            .join(&ctx, test_join_request("alice"))
            .await
            .unwrap_err();

        assert!(matches!(err, CollaboratorError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_directory_assigns_distinct_ids_past_a_byte() {
        let directory = MemoryDirectory::new(CallLog::new());
        let ctx = RunContext::background();

        let mut ids = std::collections::HashSet::new();
        for i in 0..300 {
            let id = directory
                .join(&ctx, test_join_request(&format!("user{i}")))
                .await
                .unwrap();
            ids.insert(id);
        }

        assert_eq!(ids.len(), 300);
    }

    #[tokio::test]
    async fn test_directory_announced_keys_visible_in_load() {
        let directory = MemoryDirectory::new(CallLog::new());
        let ctx = RunContext::background();
        let account_id = directory.join(&ctx, test_join_request("alice")).await.unwrap();

        let key = DeviceSigningKey::generate();
        let info = PublicKeyInfo {
            key_id: key.key_id(),
            role: crate::types::KeyRole::Primary,
            public_key: key.public_key_bytes().to_vec(),
        };
        directory
            .announce_key(&ctx, &account_id, &info, &key.key_id(), vec![0u8; 64])
            .await
            .unwrap();

        let record = directory.load_record(&ctx, &account_id).await.unwrap();
        assert_eq!(record.public_keys, vec![info]);
    }

    #[tokio::test]
    async fn test_directory_load_unknown_account_is_not_found() {
        let directory = MemoryDirectory::new(CallLog::new());
        let err = directory
            .load_record(&RunContext::background(), &AccountId::new([9; 16]))
            .await
            .unwrap_err();

        assert!(matches!(err, CollaboratorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_registrar_yield_no_key() {
        let registrar = FakeRegistrar::new(CallLog::new());
        registrar.yield_no_key();

        let record = AccountRecord {
            account_id: AccountId::new([1; 16]),
            username: "alice".to_string(),
            public_keys: vec![],
        };
        let key = registrar
            .register(&RunContext::background(), "laptop", &[0u8; 32], &record)
            .await
            .unwrap();

        assert!(key.is_none());
        assert_eq!(registrar.last_device_name(), Some("laptop".to_string()));
    }

    #[tokio::test]
    async fn test_bundle_shares_one_log() {
        let bundle = MemoryCollaborators::new();
        let ctx = RunContext::background();

        let _ = bundle.stretcher().stretch(
            &ctx,
            &Passphrase::from("pw"),
            &Salt::from_bytes(vec![0u8; FAKE_SALT_LEN]),
        );
        let _ = bundle.join_service().join(&ctx, test_join_request("alice")).await;

        assert_eq!(
            bundle.log().calls(),
            vec![CollabCall::Stretch, CollabCall::Join]
        );
    }
}

//! Directory service collaborators: join, record loading, key announcement.
//!
//! The directory is the remote authority for accounts. Signup talks to it
//! through three narrow seams so embedders can substitute transports or test
//! doubles per seam; [`RemoteDirectory`] implements all three against the
//! HTTP API.
//!
//! Wire conventions: identifiers travel as hex, binary fields (password
//! hash, salt, public keys, signatures) as standard base64.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::RunContext;
use crate::error::CollaboratorError;
use crate::http_request::Request;
use crate::secret::Salt;
use crate::types::{AccountId, AccountRecord, InviteRequest, KeyId, KeyRole, PublicKeyInfo};

// Contracts

/// Payload for creating an account.
///
/// Carries the server half of the stretched passphrase; the client half
/// never leaves the device.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Requested username.
    pub username: String,
    /// Email address for the account.
    pub email: String,
    /// Invitation code, if the service requires one.
    pub invite_code: String,
    /// Server half of the stretched passphrase.
    pub password_hash: [u8; 32],
    /// Salt the passphrase was stretched with.
    pub salt: Salt,
    /// Suppresses the welcome mail when set.
    pub skip_mail: bool,
}

impl fmt::Debug for JoinRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("invite_code", &self.invite_code)
            .field("password_hash", &"[REDACTED]")
            .field("salt", &self.salt)
            .field("skip_mail", &self.skip_mail)
            .finish()
    }
}

/// Creates accounts and accepts invitation requests.
#[async_trait]
pub trait AccountJoinService: Send + Sync {
    /// Creates an account and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the request or the transport
    /// fails.
    async fn join(
        &self,
        ctx: &RunContext,
        request: JoinRequest,
    ) -> Result<AccountId, CollaboratorError>;

    /// Submits a request for a signup invitation.
    ///
    /// # Errors
    ///
    /// Returns the service's error unmodified.
    async fn request_invite(
        &self,
        ctx: &RunContext,
        request: &InviteRequest,
    ) -> Result<(), CollaboratorError>;
}

/// Fetches the public record of an account.
#[async_trait]
pub trait AccountLoader: Send + Sync {
    /// Loads the account record for the given identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is unknown or the transport fails.
    async fn load_record(
        &self,
        ctx: &RunContext,
        account_id: &AccountId,
    ) -> Result<AccountRecord, CollaboratorError>;
}

/// Attaches public keys to an account.
#[async_trait]
pub trait KeyAnnouncer: Send + Sync {
    /// Announces a public key, authorized by a signature from an existing
    /// account key.
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the key or the transport
    /// fails.
    async fn announce_key(
        &self,
        ctx: &RunContext,
        account_id: &AccountId,
        key: &PublicKeyInfo,
        signed_by: &KeyId,
        signature: Vec<u8>,
    ) -> Result<(), CollaboratorError>;
}

// Wire DTOs

#[derive(Serialize)]
struct JoinBody {
    username: String,
    email: String,
    invite_code: String,
    password_hash: String,
    salt: String,
    skip_mail: bool,
}

#[derive(Deserialize)]
struct JoinResponse {
    account_id: String,
}

#[derive(Serialize, Deserialize)]
struct WireKey {
    key_id: String,
    role: KeyRole,
    public_key: String,
}

impl WireKey {
    fn from_info(info: &PublicKeyInfo) -> Self {
        Self {
            key_id: info.key_id.to_hex(),
            role: info.role,
            public_key: STANDARD.encode(&info.public_key),
        }
    }

    fn parse(&self) -> Result<PublicKeyInfo, CollaboratorError> {
        let key_id = KeyId::from_hex(&self.key_id).map_err(|e| {
            CollaboratorError::internal(format!("account record carried a bad key id: {e}"))
        })?;
        let public_key = STANDARD.decode(&self.public_key).map_err(|e| {
            CollaboratorError::internal(format!("account record carried a bad public key: {e}"))
        })?;
        Ok(PublicKeyInfo {
            key_id,
            role: self.role,
            public_key,
        })
    }
}

#[derive(Deserialize)]
struct AccountResponse {
    account_id: String,
    username: String,
    public_keys: Vec<WireKey>,
}

impl AccountResponse {
    fn parse(&self) -> Result<AccountRecord, CollaboratorError> {
        let account_id = AccountId::from_hex(&self.account_id).map_err(|e| {
            CollaboratorError::internal(format!("account record carried a bad account id: {e}"))
        })?;
        let public_keys = self
            .public_keys
            .iter()
            .map(WireKey::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AccountRecord {
            account_id,
            username: self.username.clone(),
            public_keys,
        })
    }
}

#[derive(Serialize)]
struct AnnounceBody {
    key: WireKey,
    signed_by: String,
    signature: String,
}

// Remote client

/// Directory API client implementing all three directory seams.
#[derive(Debug)]
pub struct RemoteDirectory {
    base_url: String,
    request: Request,
}

impl RemoteDirectory {
    /// Creates a client for the directory at the given base URL.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request: Request::new(),
        }
    }

    async fn expect_success(
        url: String,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CollaboratorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_body = response.text().await.unwrap_or_default();
        Err(CollaboratorError::network(
            url,
            Some(status.as_u16()),
            error_body,
        ))
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        what: &str,
        response: reqwest::Response,
    ) -> Result<T, CollaboratorError> {
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::internal(format!("failed to read {what}: {e}")))?;
        serde_json::from_str(&text).map_err(|e| {
            // Body prefix only; directory responses can carry account data.
            CollaboratorError::internal(format!(
                "failed to parse {what}: {e}, received: {}",
                text.chars().take(20).collect::<String>()
            ))
        })
    }
}

#[async_trait]
impl AccountJoinService for RemoteDirectory {
    async fn join(
        &self,
        ctx: &RunContext,
        request: JoinRequest,
    ) -> Result<AccountId, CollaboratorError> {
        let url = format!("{}/signup/join", self.base_url);
        let body = JoinBody {
            username: request.username,
            email: request.email,
            invite_code: request.invite_code,
            password_hash: STANDARD.encode(request.password_hash),
            salt: STANDARD.encode(request.salt.as_bytes()),
            skip_mail: request.skip_mail,
        };

        let builder = self.request.post(&url, ctx).json(&body);
        let response = self.request.handle(builder).await?;
        let response = Self::expect_success(url, response).await?;

        let joined: JoinResponse = Self::parse_json("join response", response).await?;
        AccountId::from_hex(&joined.account_id).map_err(|e| {
            CollaboratorError::internal(format!("join response carried a bad account id: {e}"))
        })
    }

    async fn request_invite(
        &self,
        ctx: &RunContext,
        request: &InviteRequest,
    ) -> Result<(), CollaboratorError> {
        let url = format!("{}/invite_requests", self.base_url);
        let builder = self.request.post(&url, ctx).json(request);
        let response = self.request.handle(builder).await?;
        Self::expect_success(url, response).await?;
        Ok(())
    }
}

#[async_trait]
impl AccountLoader for RemoteDirectory {
    async fn load_record(
        &self,
        ctx: &RunContext,
        account_id: &AccountId,
    ) -> Result<AccountRecord, CollaboratorError> {
        let url = format!("{}/accounts/{}", self.base_url, account_id.to_hex());
        let builder = self.request.get(&url, ctx);
        let response = self.request.handle(builder).await?;
        let response = Self::expect_success(url, response).await?;

        let account: AccountResponse =
            Self::parse_json("account record", response).await?;
        account.parse()
    }
}

#[async_trait]
impl KeyAnnouncer for RemoteDirectory {
    async fn announce_key(
        &self,
        ctx: &RunContext,
        account_id: &AccountId,
        key: &PublicKeyInfo,
        signed_by: &KeyId,
        signature: Vec<u8>,
    ) -> Result<(), CollaboratorError> {
        let url = format!("{}/accounts/{}/keys", self.base_url, account_id.to_hex());
        let body = AnnounceBody {
            key: WireKey::from_info(key),
            signed_by: signed_by.to_hex(),
            signature: STANDARD.encode(signature),
        };

        let builder = self.request.post(&url, ctx).json(&body);
        let response = self.request.handle(builder).await?;
        Self::expect_success(url, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_join_request() -> JoinRequest {
        JoinRequest {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            invite_code: "WELCOME".to_string(),
            password_hash: [4u8; 32],
            salt: Salt::from_bytes(vec![5u8; 16]),
            skip_mail: false,
        }
    }

    #[test]
    fn test_debug_output_shows_the_normalized_base_url() {
        let directory = RemoteDirectory::new("https://svc.test/");
        let rendered = format!("{directory:?}");
        assert!(rendered.contains(r#"base_url: "https://svc.test""#));
    }

    #[tokio::test]
    async fn test_join_posts_credentials_and_parses_id() {
        let mut server = mockito::Server::new_async().await;
        let account_id = AccountId::new([0xAA; 16]);

        let mock = server
            .mock("POST", "/signup/join")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "username": "alice",
                "password_hash": STANDARD.encode([4u8; 32]),
                "skip_mail": false,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({ "account_id": account_id.to_hex() }).to_string(),
            )
            .create_async()
            .await;

        let directory = RemoteDirectory::new(&server.url());
        let ctx = RunContext::background();
        let joined = directory.join(&ctx, test_join_request()).await.unwrap();

        assert_eq!(joined, account_id);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_join_surfaces_rejection_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/signup/join")
            .with_status(409)
            .with_body("username is taken")
            .create_async()
            .await;

        let directory = RemoteDirectory::new(&server.url());
        let ctx = RunContext::background();
        let err = directory.join(&ctx, test_join_request()).await.unwrap_err();

        match err {
            CollaboratorError::Network {
                status, message, ..
            } => {
                assert_eq!(status, Some(409));
                assert_eq!(message, "username is taken");
            }
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_record_parses_keys() {
        let mut server = mockito::Server::new_async().await;
        let account_id = AccountId::new([0xBB; 16]);
        let key_id = KeyId::for_public_key(&[7u8; 32]);

        server
            .mock("GET", format!("/accounts/{}", account_id.to_hex()).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "account_id": account_id.to_hex(),
                    "username": "alice",
                    "public_keys": [{
                        "key_id": key_id.to_hex(),
                        "role": "primary",
                        "public_key": STANDARD.encode([7u8; 32]),
                    }],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let directory = RemoteDirectory::new(&server.url());
        let ctx = RunContext::background();
        let record = directory.load_record(&ctx, &account_id).await.unwrap();

        assert_eq!(record.account_id, account_id);
        assert_eq!(record.username, "alice");
        assert_eq!(record.public_keys.len(), 1);
        assert_eq!(record.public_keys[0].key_id, key_id);
        assert_eq!(record.public_keys[0].role, KeyRole::Primary);
        assert_eq!(record.public_keys[0].public_key, vec![7u8; 32]);
    }

    #[tokio::test]
    async fn test_load_record_rejects_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        let account_id = AccountId::new([0xCC; 16]);

        server
            .mock("GET", format!("/accounts/{}", account_id.to_hex()).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"account_id": "not hex", "username": "x", "public_keys": []}"#)
            .create_async()
            .await;

        let directory = RemoteDirectory::new(&server.url());
        let ctx = RunContext::background();
        let err = directory.load_record(&ctx, &account_id).await.unwrap_err();

        assert!(matches!(err, CollaboratorError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_announce_key_posts_signature() {
        let mut server = mockito::Server::new_async().await;
        let account_id = AccountId::new([0xDD; 16]);
        let signer = KeyId::for_public_key(&[1u8; 32]);
        let info = PublicKeyInfo {
            key_id: KeyId::for_public_key(&[2u8; 32]),
            role: KeyRole::Derived,
            public_key: vec![2u8; 32],
        };

        let mock = server
            .mock(
                "POST",
                format!("/accounts/{}/keys", account_id.to_hex()).as_str(),
            )
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "signed_by": signer.to_hex(),
                "signature": STANDARD.encode([9u8; 64]),
            })))
            .with_status(200)
            .create_async()
            .await;

        let directory = RemoteDirectory::new(&server.url());
        let ctx = RunContext::background();
        directory
            .announce_key(&ctx, &account_id, &info, &signer, vec![9u8; 64])
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_request_invite_passes_error_through() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/invite_requests")
            .with_status(403)
            .with_body("invites are closed")
            .create_async()
            .await;

        let directory = RemoteDirectory::new(&server.url());
        let ctx = RunContext::background();
        let invite = InviteRequest {
            email: "alice@example.com".to_string(),
            full_name: "Alice Example".to_string(),
            notes: "heard about it from a friend".to_string(),
        };
        let err = directory
            .request_invite(&ctx, &invite)
            .await
            .unwrap_err();

        match err {
            CollaboratorError::Network {
                status, message, ..
            } => {
                assert_eq!(status, Some(403));
                assert_eq!(message, "invites are closed");
            }
            other => panic!("expected network error, got {other:?}"),
        }
    }
}

//! Account signup orchestration.
//!
//! `enrollkit-core` drives the creation of an account and its first device
//! identity against an identity service: passphrase stretching, account
//! join, device key registration, deterministic subkey derivation and an
//! optional external key import, in that order, with no retry and no
//! rollback on partial failure. Every stage is a collaborator behind a
//! trait in [`collab`]; the crate ships working defaults (Argon2
//! stretching, an HTTP directory client, sealed device keys, HKDF subkey
//! derivation) plus in-memory fakes for tests and embedder development.

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod collab;

mod config;
pub use config::*;

mod consumers;
pub use consumers::*;

mod context;
pub use context::*;

mod error;
pub use error::*;

mod logger;
pub use logger::*;

mod secret;
pub use secret::*;

mod signup;
pub use signup::*;

mod types;
pub use types::*;

// private modules
mod http_request;

//! Credential state for the console client
//!
//! Holds the access/renewal token pair and the identity snapshot of the
//! signed-in principal, written through to a best-effort blob store so a
//! restarted process resumes the session.
//!
//! Credential flow:
//! 1. Login response stored via `CredentialStore::set_credential()` and
//!    `CredentialStore::set_identity()`
//! 2. The request pipeline reads `access_token()` for every call
//! 3. Renewal replaces the pair via `set_credential()`, or wipes it via
//!    `clear()` when the renewal credential is rejected
//! 4. Subscribers of `subscribe()` observe every access token change

pub mod constants;
pub mod credentials;
pub mod identity;
pub mod storage;
pub mod token;

pub use common::Secret;
pub use constants::*;
pub use credentials::{Credential, CredentialStore};
pub use identity::{Identity, Role};
pub use storage::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use token::{LoginRequest, LoginResponse, RenewRequest, TokenPair};

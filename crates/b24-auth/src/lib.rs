//! Bitrix24 OAuth credential management
//!
//! Provides the per-portal credential record, the pluggable storage trait
//! with its JSON-file default, the install-event handler that creates the
//! first record, and the token-refresh wire details. This crate is a
//! standalone library with no dependency on the client crate, so it can be
//! tested and used independently.
//!
//! Credential flow:
//! 1. Portal installs the app; `install::handle_install()` builds the record
//! 2. Record stored via a `CredentialStorage` implementation
//! 3. The client reads a snapshot per call and sends `access_token` as `auth`
//! 4. On `expired_token`, the client refreshes against
//!    `oauth::derive_oauth_endpoint()` and writes the merged record back

pub mod error;
pub mod file_store;
pub mod install;
pub mod oauth;
pub mod record;
pub mod storage;

pub use error::{Error, Result};
pub use file_store::FileStore;
pub use install::{InstallResult, handle_install};
pub use oauth::{DEFAULT_OAUTH_ENDPOINT, derive_oauth_endpoint, refresh_params};
pub use record::{CredentialHint, CredentialRecord, DEFAULT_EXPIRES_IN};
pub use storage::{CredentialStorage, StorageFuture};

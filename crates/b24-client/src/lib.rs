//! Bitrix24 REST client
//!
//! Invokes REST methods on behalf of an installed OAuth application across
//! many tenant portals. The client manages the full credential life-cycle
//! (install, storage, refresh on expiry), transports invocations as
//! form-encoded HTTP requests with retry/backoff and manual redirect
//! handling, and paces requests per portal against the server's leaky-bucket
//! quota.
//!
//! Call flow:
//! 1. `B24Client::call(method, params, hint)` loads the portal's credential
//!    snapshot from the configured [`CredentialStorage`]
//! 2. The per-portal limiter admits the request (FIFO, spaced, bucket-gated)
//! 3. The transport POSTs `<client_endpoint><method>.json` with the
//!    bracket-encoded parameters plus `auth`
//! 4. On `expired_token`, the client refreshes against the portal's OAuth
//!    endpoint, persists the merged record, and re-issues the call once
//!
//! ```no_run
//! use std::sync::Arc;
//! use b24_client::{B24Client, ClientConfig, CredentialHint, FileStore};
//!
//! # async fn run() -> Result<(), b24_client::Error> {
//! let store = Arc::new(FileStore::load("credentials.json".into()).await?);
//! let client = B24Client::new(ClientConfig::new("client-id", "client-secret", store))?;
//!
//! let hint = CredentialHint::for_domain("portal.bitrix24.com");
//! let user = client.call("user.current", serde_json::json!({}), &hint).await?;
//! println!("{user}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod log;
pub mod qs;
pub mod transport;

pub use client::B24Client;
pub use config::{ClientConfig, DEFAULT_ATTEMPTS, DEFAULT_BASE_PAUSE, DEFAULT_REQUEST_TIMEOUT};
pub use error::{Error, Result};
pub use log::{Level, LogContext, Logger, LoggerConfig};
pub use transport::{Envelope, FetchOptions, Transport, USER_AGENT, Verb};

pub use b24_auth::{
    CredentialHint, CredentialRecord, CredentialStorage, DEFAULT_OAUTH_ENDPOINT, FileStore,
    InstallResult, StorageFuture, derive_oauth_endpoint, handle_install,
};
pub use b24_limiter::{LimiterSettings, RateLimiter, TenantStats};
pub use common::Secret;

//! Static client configuration
//!
//! Built once at initialization and read-only afterwards. The credential
//! storage handle is the injection point for persistence; everything else
//! tunes the transport and the limiter.

use std::sync::Arc;
use std::time::Duration;

use b24_auth::CredentialStorage;
use b24_limiter::LimiterSettings;
use common::Secret;

use crate::error::{Error, Result};
use crate::log::LoggerConfig;

/// Default upper bound on transport attempts per logical call.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default backoff base.
pub const DEFAULT_BASE_PAUSE: Duration = Duration::from_millis(1000);

/// Default per-attempt abort timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Process-wide client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// OAuth 2.0 client identifier; required
    pub client_id: String,
    /// OAuth 2.0 client secret; required
    pub client_secret: Secret,
    /// Credential persistence, injected by the deployment
    pub storage: Arc<dyn CredentialStorage>,
    /// Upper bound on transport attempts per logical call
    pub attempts: u32,
    /// Backoff base for retries
    pub base_pause: Duration,
    /// Per-attempt abort timeout
    pub request_timeout: Duration,
    /// Optional upstream proxy URL
    pub proxy: Option<String>,
    /// Fixed OAuth token endpoint; when unset the endpoint is derived from
    /// the credential record's `server_endpoint` per portal
    pub oauth_endpoint: Option<String>,
    /// Logger gate
    pub logger: LoggerConfig,
    /// Leaky-bucket tunables
    pub limiter: LimiterSettings,
}

impl ClientConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret>,
        storage: Arc<dyn CredentialStorage>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            storage,
            attempts: DEFAULT_ATTEMPTS,
            base_pause: DEFAULT_BASE_PAUSE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            proxy: None,
            oauth_endpoint: None,
            logger: LoggerConfig::default(),
            limiter: LimiterSettings::default(),
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Legacy spelling of [`with_attempts`](Self::with_attempts), kept for
    /// configs ported from the Node client.
    #[must_use]
    pub fn with_tryes(self, attempts: u32) -> Self {
        self.with_attempts(attempts)
    }

    #[must_use]
    pub fn with_base_pause(mut self, base_pause: Duration) -> Self {
        self.base_pause = base_pause;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub fn with_oauth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.oauth_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: LoggerConfig) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn with_limiter(mut self, limiter: LimiterSettings) -> Self {
        self.limiter = limiter;
        self
    }

    /// Check the invariants no call can proceed without.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(Error::Module("client_id must be configured".into()));
        }
        if self.client_secret.is_empty() {
            return Err(Error::Module("client_secret must be configured".into()));
        }
        if self.attempts == 0 {
            return Err(Error::Module("attempts must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use b24_auth::FileStore;

    async fn storage() -> Arc<dyn CredentialStorage> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        // The tempdir is dropped here; the store never flushes in these tests.
        Arc::new(FileStore::load(path).await.unwrap())
    }

    #[tokio::test]
    async fn defaults_match_documented_values() {
        let config = ClientConfig::new("C", "S", storage().await);
        assert_eq!(config.attempts, 3);
        assert_eq!(config.base_pause, Duration::from_millis(1000));
        assert_eq!(config.request_timeout, Duration::from_millis(15_000));
        assert!(config.proxy.is_none());
        assert!(config.logger.enabled);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn missing_client_id_fails_validation() {
        let config = ClientConfig::new("", "S", storage().await);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn missing_client_secret_fails_validation() {
        let config = ClientConfig::new("C", "", storage().await);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn zero_attempts_fails_validation() {
        let config = ClientConfig::new("C", "S", storage().await).with_attempts(0);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn legacy_tryes_spelling_sets_attempts() {
        let config = ClientConfig::new("C", "S", storage().await).with_tryes(5);
        assert_eq!(config.attempts, 5);
    }

    #[tokio::test]
    async fn secret_never_prints() {
        let config = ClientConfig::new("C", "super-secret", storage().await);
        assert_eq!(format!("{:?}", config.client_secret), "[REDACTED]");
    }
}

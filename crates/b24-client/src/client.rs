//! Call orchestrator
//!
//! `B24Client::call` is the single public entry point for method
//! invocations. It loads the tenant's credential snapshot, gates on the
//! limiter, runs the transport, reports the outcome back to the limiter,
//! and on `expired_token` drives the refresh sub-call before re-issuing the
//! original call once. Refresh depth is bounded at 1 so a server that keeps
//! answering `expired_token` cannot produce an infinite loop.

use serde_json::{Map, Value};

use b24_auth::{CredentialHint, CredentialRecord, InstallResult, derive_oauth_endpoint, refresh_params};
use b24_limiter::{RateLimiter, TenantStats};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::log::{LogContext, Logger, error_payload};
use crate::transport::{Envelope, FetchOptions, Transport, Verb};

/// Internal method name used for limiter bookkeeping of refresh sub-calls.
const REFRESH_METHOD: &str = "oauth.token.refresh";

/// Bitrix24 REST client for one OAuth application across many portals.
pub struct B24Client {
    config: ClientConfig,
    transport: Transport,
    limiter: RateLimiter,
    logger: Logger,
}

impl B24Client {
    /// Build a client from a validated configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let logger = Logger::new(&config.logger);
        let transport = Transport::new(logger.clone(), config.proxy.as_deref())?;
        let limiter = RateLimiter::new(config.limiter.clone());
        Ok(Self {
            config,
            transport,
            limiter,
            logger,
        })
    }

    /// Invoke a named REST method on behalf of the portal `hint` identifies.
    ///
    /// Returns the decoded response envelope on success. Domain-level errors
    /// other than `expired_token` surface as [`Error::Client`]; an expired
    /// token triggers one refresh and one re-issue before giving up.
    pub async fn call(&self, method: &str, params: Value, hint: &CredentialHint) -> Result<Value> {
        self.call_with_depth(method, params, hint, 0).await
    }

    /// Handle an install-event payload with the configured credential store.
    pub async fn handle_install(&self, payload: &Value) -> Result<InstallResult> {
        b24_auth::handle_install(payload, self.config.storage.as_ref())
            .await
            .map_err(Into::into)
    }

    /// Limiter state snapshot for introspection.
    pub async fn limiter_stats(&self) -> Vec<TenantStats> {
        self.limiter.stats().await
    }

    async fn call_with_depth(
        &self,
        method: &str,
        params: Value,
        hint: &CredentialHint,
        depth: u8,
    ) -> Result<Value> {
        if method.is_empty() {
            return Err(Error::Module("method must not be empty".into()));
        }
        if hint.domain.is_empty() {
            return Err(Error::Module("hint must carry a portal domain".into()));
        }
        if !params.is_object() && !params.is_null() {
            return Err(Error::Module("params must be a parameter map".into()));
        }

        let record = self.load_credentials(hint).await?;

        self.limiter.admit(&record.domain, method).await?;

        let url = format!("{}{}.json", record.client_endpoint, method);
        let mut form = match &params {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        // auth always wins over a caller-supplied value
        form.insert("auth".into(), Value::String(record.access_token.clone()));
        let form = Value::Object(form);

        let ctx = LogContext::new(&record.domain, method);
        let result = self
            .transport
            .fetch(&url, Verb::Post, &form, &self.fetch_options(), &ctx)
            .await;
        let envelope = self.observe_outcome(&record.domain, result).await?;

        if depth == 0
            && envelope.body.get("error").and_then(Value::as_str) == Some("expired_token")
        {
            return self.refresh_and_retry(method, params, hint, &record).await;
        }

        Ok(envelope.body)
    }

    /// Refresh the portal's credentials, persist them, and re-issue the
    /// original call with depth 1.
    async fn refresh_and_retry(
        &self,
        method: &str,
        params: Value,
        hint: &CredentialHint,
        record: &CredentialRecord,
    ) -> Result<Value> {
        let endpoint = self
            .config
            .oauth_endpoint
            .clone()
            .unwrap_or_else(|| derive_oauth_endpoint(record.server_endpoint.as_deref()));
        let query = refresh_params(
            &self.config.client_id,
            self.config.client_secret.expose(),
            &record.refresh_token,
        );

        self.limiter.admit(&record.domain, REFRESH_METHOD).await?;

        let ctx = LogContext::new(&record.domain, REFRESH_METHOD);
        self.logger
            .info(&ctx, "refreshing expired access token", None);
        let result = self
            .transport
            .fetch(&endpoint, Verb::Get, &query, &self.fetch_options(), &ctx)
            .await;
        let envelope = self.observe_outcome(&record.domain, result).await?;

        // A 2xx envelope can still carry an OAuth error; surface it unchanged
        if envelope.body.get("error").is_some() {
            self.logger
                .warn(&ctx, "token refresh rejected", Some(&envelope.body));
            return Ok(envelope.body);
        }

        let delta: CredentialRecord = match serde_json::from_value(envelope.body.clone()) {
            Ok(delta) => delta,
            Err(e) => {
                self.logger
                    .error(&ctx, "malformed refresh response", Some(&error_payload(&e)));
                return Err(Error::Module(format!("malformed refresh response: {e}")));
            }
        };
        let merged = record.merged_with(delta);
        self.config.storage.write(&merged).await?;
        self.logger
            .info(&ctx, "credentials refreshed and persisted", None);

        Box::pin(self.call_with_depth(method, params, hint, 1)).await
    }

    async fn load_credentials(&self, hint: &CredentialHint) -> Result<CredentialRecord> {
        let record = self.config.storage.read(hint).await?;
        match record {
            Some(record) if record.is_valid() => Ok(record),
            _ => Err(Error::NoInstallApp(hint.domain.clone())),
        }
    }

    /// Report the transport outcome to the limiter before returning it.
    async fn observe_outcome(&self, domain: &str, result: Result<Envelope>) -> Result<Envelope> {
        match result {
            Ok(envelope) => {
                self.limiter
                    .observe(domain, envelope.status, &envelope.body)
                    .await;
                Ok(envelope)
            }
            Err(err) => {
                if let Some(status) = err.status() {
                    let body = err.body().cloned().unwrap_or(Value::Null);
                    self.limiter.observe(domain, status, &body).await;
                }
                Err(err)
            }
        }
    }

    fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            attempts: self.config.attempts,
            base_pause: self.config.base_pause,
            timeout: self.config.request_timeout,
        }
    }
}

//! Error taxonomy for the public client API
//!
//! Every failure surfaces as one of these variants; nothing panics out of
//! the public API. `kind()` yields the stable snake_case tag, and
//! `to_envelope()` renders the uniform JSON error envelope callers can
//! forward without inspecting variants.

use serde_json::{Value, json};

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The credential store has no valid record for the portal
    #[error("no install found for portal {0}")]
    NoInstallApp(String),

    /// An internal invariant violation escaped into the orchestrator
    #[error("module error: {0}")]
    Module(String),

    /// Transport attempts exhausted on retryable network failures
    #[error("network error after {attempts} attempts: {message}")]
    Network { attempts: u32, message: String },

    /// 4xx from the server, excluding `expired_token`
    #[error("client error (HTTP {status})")]
    Client { status: u16, body: Value },

    /// 5xx from the server after retries exhausted
    #[error("server error (HTTP {status}) after {attempts} attempts")]
    Server {
        status: u16,
        attempts: u32,
        body: Value,
    },

    /// Redirect chain exceeded the budget or carried no Location
    #[error("redirect error: {0}")]
    Redirect(String),

    /// Response body could not be decoded
    #[error("response parse error (HTTP {status}, content-type {content_type})")]
    ResponseParse { status: u16, content_type: String },

    /// Status outside the 2xx-5xx classes
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    /// Install handler failed or the payload shape was unrecognized
    #[error("install error: {0}")]
    Install(String),

    /// The per-tenant admission queue is at its cap
    #[error("admission queue overflow for portal {0}")]
    QueueOverflow(String),
}

impl Error {
    /// Stable machine-readable tag for this failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoInstallApp(_) => "no_install_app",
            Error::Module(_) => "module_error",
            Error::Network { .. } => "network_error",
            Error::Client { .. } => "client_error",
            Error::Server { .. } => "server_error",
            Error::Redirect(_) => "redirect_error",
            Error::ResponseParse { .. } => "response_parse_error",
            Error::UnexpectedStatus(_) => "unexpected_status",
            Error::Install(_) => "install_error",
            Error::QueueOverflow(_) => "queue_overflow",
        }
    }

    /// HTTP status attached to this error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Client { status, .. }
            | Error::Server { status, .. }
            | Error::ResponseParse { status, .. } => Some(*status),
            Error::UnexpectedStatus(status) => Some(*status),
            _ => None,
        }
    }

    /// Server response body attached to this error, when one was parsed.
    pub fn body(&self) -> Option<&Value> {
        match self {
            Error::Client { body, .. } | Error::Server { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Uniform JSON error envelope: kind, description, and any status/body.
    pub fn to_envelope(&self) -> Value {
        let mut envelope = json!({
            "error": self.kind(),
            "error_description": self.to_string(),
        });
        if let Some(status) = self.status() {
            envelope["status"] = json!(status);
        }
        if let Some(body) = self.body() {
            envelope["body"] = body.clone();
        }
        envelope
    }
}

impl From<b24_auth::Error> for Error {
    fn from(err: b24_auth::Error) -> Self {
        match err {
            b24_auth::Error::InstallPayload(msg) => Error::Install(msg),
            other => Error::Module(other.to_string()),
        }
    }
}

impl From<b24_limiter::Error> for Error {
    fn from(err: b24_limiter::Error) -> Self {
        match err {
            b24_limiter::Error::QueueOverflow { domain, .. } => Error::QueueOverflow(domain),
            other => Error::Module(other.to_string()),
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Leveled, redacting logger
//!
//! A thin gate in front of `tracing`: the library never installs a
//! subscriber, it only emits events. Every record carries the
//! `[b24-rs][<domain>][<method>][<status?>]` prefix and every structured
//! payload passes through the redaction engine before it can reach a
//! subscriber, so tokens and secrets cannot leak into logs regardless of
//! subscriber configuration.

use serde_json::{Value, json};

use common::redact_value;

/// Log severity, ordered debug < info < warn < error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

/// Logger section of the client configuration.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Master on/off switch
    pub enabled: bool,
    /// Minimum level that is emitted
    pub level: Level,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: Level::Info,
        }
    }
}

/// Per-request log coordinates carried through the transport.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub domain: String,
    pub api_method: String,
    pub status: Option<u16>,
    pub request_id: String,
}

impl LogContext {
    pub fn new(domain: impl Into<String>, api_method: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            api_method: api_method.into(),
            status: None,
            request_id: String::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Fixed record prefix. The status bracket appears only once a response
    /// status is known.
    pub fn prefix(&self) -> String {
        let mut prefix = format!("[b24-rs][{}][{}]", self.domain, self.api_method);
        if let Some(status) = self.status {
            prefix.push_str(&format!("[{status}]"));
        }
        prefix
    }
}

/// Level-gated emitter shared by the orchestrator and the transport.
#[derive(Debug, Clone)]
pub struct Logger {
    enabled: bool,
    min_level: Level,
}

impl Logger {
    pub fn new(config: &LoggerConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_level: config.level,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min_level: Level::Error,
        }
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        self.enabled && level >= self.min_level
    }

    /// Emit one record. The payload is redacted before emission.
    pub fn log(&self, level: Level, ctx: &LogContext, message: &str, payload: Option<&Value>) {
        if !self.is_enabled(level) {
            return;
        }
        let prefix = ctx.prefix();
        let payload = payload.map(redact_value).unwrap_or(Value::Null);
        match level {
            Level::Debug => tracing::debug!(
                target: "b24",
                request_id = %ctx.request_id,
                payload = %payload,
                "{prefix} {message}"
            ),
            Level::Info => tracing::info!(
                target: "b24",
                request_id = %ctx.request_id,
                payload = %payload,
                "{prefix} {message}"
            ),
            Level::Warn => tracing::warn!(
                target: "b24",
                request_id = %ctx.request_id,
                payload = %payload,
                "{prefix} {message}"
            ),
            Level::Error => tracing::error!(
                target: "b24",
                request_id = %ctx.request_id,
                payload = %payload,
                "{prefix} {message}"
            ),
        }
    }

    pub fn debug(&self, ctx: &LogContext, message: &str, payload: Option<&Value>) {
        self.log(Level::Debug, ctx, message, payload);
    }

    pub fn info(&self, ctx: &LogContext, message: &str, payload: Option<&Value>) {
        self.log(Level::Info, ctx, message, payload);
    }

    pub fn warn(&self, ctx: &LogContext, message: &str, payload: Option<&Value>) {
        self.log(Level::Warn, ctx, message, payload);
    }

    pub fn error(&self, ctx: &LogContext, message: &str, payload: Option<&Value>) {
        self.log(Level::Error, ctx, message, payload);
    }
}

/// Expand an error into a structured payload: message plus the source chain
/// as separate lines.
pub fn error_payload(err: &(dyn std::error::Error + 'static)) -> Value {
    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    json!({
        "message": err.to_string(),
        "chain": chain,
    })
}

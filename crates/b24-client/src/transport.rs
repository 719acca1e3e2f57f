//! HTTP transport for one logical request
//!
//! A logical request spans manual redirect following, retries on 5xx and on
//! retryable network failures, and content-type-driven body parsing. All of
//! those consume one shared attempt budget. Each attempt carries its own
//! abort timeout; expiry cancels only the outstanding network I/O.
//!
//! Every log line of a logical request carries the same short random request
//! id, which is what makes attempt chains traceable in production logs.

use std::time::Duration;

use rand::Rng;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::log::{LogContext, Logger, error_payload};
use crate::qs;

/// User-Agent identifying the library on every request.
pub const USER_AGENT: &str = concat!("b24-rs ", env!("CARGO_PKG_VERSION"));

/// HTTP verb of a method or refresh call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl Verb {
    fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
        }
    }
}

/// Per-call transport tuning, taken from the client configuration.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Shared budget for retries and redirects beyond the first attempt
    pub attempts: u32,
    /// Backoff base; attempt n sleeps `base * 2^n` plus jitter
    pub base_pause: Duration,
    /// Abort timeout applied to each attempt
    pub timeout: Duration,
}

/// Parsed response: HTTP status plus the decoded body.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub status: u16,
    pub body: Value,
}

/// Reusable HTTP transport. Redirects are disabled on the underlying client
/// and followed manually so the budget and logging stay in one place.
pub struct Transport {
    http: reqwest::Client,
    logger: Logger,
}

impl Transport {
    pub fn new(logger: Logger, proxy: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::Module(format!("invalid proxy configuration: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Module(format!("building HTTP client: {e}")))?;
        Ok(Self { http, logger })
    }

    /// Send one logical request and parse the response.
    pub async fn fetch(
        &self,
        url: &str,
        verb: Verb,
        params: &Value,
        opts: &FetchOptions,
        ctx: &LogContext,
    ) -> Result<Envelope> {
        let mut ctx = ctx.clone();
        if ctx.request_id.is_empty() {
            ctx.request_id = request_id();
        }
        let encoded = qs::encode(params);
        let mut url = url.to_string();
        let mut budget = opts.attempts;
        let mut retries = 0u32;

        loop {
            self.logger.debug(
                &ctx,
                "sending request",
                Some(&json!({"url": url, "verb": verb.as_str(), "budget": budget})),
            );

            let response = match self.send_once(&url, verb, &encoded, opts.timeout).await {
                Ok(response) => response,
                Err(err) if is_retryable(&err) => {
                    if budget == 0 {
                        self.logger.error(
                            &ctx,
                            "network error, attempts exhausted",
                            Some(&json!({"error": error_payload(&err)})),
                        );
                        return Err(Error::Network {
                            attempts: opts.attempts,
                            message: err.to_string(),
                        });
                    }
                    budget -= 1;
                    let pause = backoff(opts.base_pause, retries);
                    self.logger.warn(
                        &ctx,
                        "retryable network error, backing off",
                        Some(&json!({
                            "error": error_payload(&err),
                            "pause_ms": pause.as_millis() as u64
                        })),
                    );
                    tokio::time::sleep(pause).await;
                    retries += 1;
                    continue;
                }
                Err(err) => {
                    self.logger.error(
                        &ctx,
                        "fatal network error",
                        Some(&json!({"error": error_payload(&err)})),
                    );
                    return Err(Error::Network {
                        attempts: opts.attempts.saturating_sub(budget),
                        message: err.to_string(),
                    });
                }
            };

            let status = response.status();
            let status_ctx = ctx.clone().with_status(status.as_u16());

            if status.is_success() {
                let envelope = self.decode_response(response, &status_ctx).await?;
                self.logger
                    .debug(&status_ctx, "request succeeded", Some(&envelope.body));
                return Ok(envelope);
            }

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let Some(location) = location else {
                    return Err(Error::Redirect("redirect without a Location header".into()));
                };
                if budget == 0 {
                    return Err(Error::Redirect(format!(
                        "redirect budget exhausted after {} attempts",
                        opts.attempts
                    )));
                }
                budget -= 1;
                url = resolve_location(&url, &location);
                self.logger.info(
                    &status_ctx,
                    "following redirect",
                    Some(&json!({"location": url})),
                );
                continue;
            }

            if status.is_client_error() {
                let envelope = self.decode_response(response, &status_ctx).await?;
                // expired_token is handled by the orchestrator's refresh path
                if envelope.body.get("error").and_then(Value::as_str) == Some("expired_token") {
                    self.logger
                        .info(&status_ctx, "access token expired", None);
                    return Ok(envelope);
                }
                self.logger
                    .warn(&status_ctx, "client error", Some(&envelope.body));
                return Err(Error::Client {
                    status: status.as_u16(),
                    body: envelope.body,
                });
            }

            if status.is_server_error() {
                let body = self.decode_lenient(response, &status_ctx).await;
                if budget == 0 {
                    self.logger.error(
                        &status_ctx,
                        "server error, attempts exhausted",
                        Some(&body),
                    );
                    return Err(Error::Server {
                        status: status.as_u16(),
                        attempts: opts.attempts,
                        body,
                    });
                }
                budget -= 1;
                let pause = backoff(opts.base_pause, retries);
                self.logger.warn(
                    &status_ctx,
                    "server error, backing off",
                    Some(&json!({"pause_ms": pause.as_millis() as u64})),
                );
                tokio::time::sleep(pause).await;
                retries += 1;
                continue;
            }

            return Err(Error::UnexpectedStatus(status.as_u16()));
        }
    }

    async fn send_once(
        &self,
        url: &str,
        verb: Verb,
        encoded: &str,
        timeout: Duration,
    ) -> reqwest::Result<reqwest::Response> {
        let request = match verb {
            Verb::Get => {
                let full = if encoded.is_empty() {
                    url.to_string()
                } else if url.contains('?') {
                    format!("{url}&{encoded}")
                } else {
                    format!("{url}?{encoded}")
                };
                self.http.get(full)
            }
            Verb::Post => self
                .http
                .post(url)
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(encoded.to_string()),
        };
        request.timeout(timeout).send().await
    }

    async fn decode_response(
        &self,
        response: reqwest::Response,
        ctx: &LogContext,
    ) -> Result<Envelope> {
        let status = response.status().as_u16();
        let content_type = header_value(&response, reqwest::header::CONTENT_TYPE);
        let text = response.text().await.map_err(|e| {
            self.logger.error(
                ctx,
                "failed reading response body",
                Some(&json!({"error": error_payload(&e)})),
            );
            Error::ResponseParse {
                status,
                content_type: content_type.clone(),
            }
        })?;
        let body = parse_payload(status, &content_type, &text)?;
        Ok(Envelope { status, body })
    }

    /// Best-effort decode for responses that are about to be retried.
    async fn decode_lenient(&self, response: reqwest::Response, ctx: &LogContext) -> Value {
        match self.decode_response(response, ctx).await {
            Ok(envelope) => envelope.body,
            Err(_) => Value::Null,
        }
    }
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Decode a response body according to its declared content type.
fn parse_payload(status: u16, content_type: &str, text: &str) -> Result<Value> {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if media.is_empty() || status == 204 {
        return Ok(json!({"ok": (200..300).contains(&status)}));
    }
    if media.ends_with("/json") || media.ends_with("+json") {
        return serde_json::from_str(text).map_err(|_| Error::ResponseParse {
            status,
            content_type: media,
        });
    }
    if media == "text/plain" || media == "text/html" {
        // Servers sometimes mislabel JSON as text; sniff before giving up
        if let Ok(value) = serde_json::from_str(text) {
            return Ok(value);
        }
        let format = if media == "text/html" { "html" } else { "text" };
        return Ok(json!({"content": text, "format": format}));
    }
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }
    Ok(json!({"content": text, "format": media}))
}

/// Delay before retry n (0-based): `base * 2^n` plus uniform jitter in
/// `[0, 0.3 * base * 2^n)`.
fn backoff(base: Duration, retries: u32) -> Duration {
    let exponential = base.as_millis() as f64 * 2f64.powi(retries as i32);
    let jitter = rand::rng().random_range(0.0..0.3) * exponential;
    Duration::from_millis((exponential + jitter) as u64)
}

/// Short random token tying together every log line of one logical request.
fn request_id() -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Network failures worth another attempt: timeouts and connection-level
/// faults, identified by reqwest's own classification, the underlying I/O
/// error kind, or the conventional message substrings.
fn is_retryable(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    let message = err.to_string().to_lowercase();
    if message.contains("timeout") || message.contains("connection reset") {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::TimedOut
                    | ErrorKind::HostUnreachable
                    | ErrorKind::NetworkUnreachable
                    | ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotFound
                    | ErrorKind::ConnectionRefused
            ) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

/// Resolve a Location header against the current URL; absolute locations
/// replace it, relative ones join.
fn resolve_location(current: &str, location: &str) -> String {
    match url::Url::parse(current).and_then(|base| base.join(location)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => location.to_string(),
    }
}

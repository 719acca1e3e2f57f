//! Sensitive-field redaction for structured log payloads
//!
//! Everything the library logs passes through `redact_value` before it can
//! reach a tracing subscriber. Scrubbing is by field name at any nesting
//! depth, plus URL query-parameter rewriting and base64 blob collapsing for
//! string values. The walk is depth-capped so a pathologically nested
//! payload cannot recurse unboundedly.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use url::Url;

/// Placeholder written in place of every scrubbed value.
pub const PLACEHOLDER: &str = "[REDACTED]";

/// Maximum nesting depth serialized before truncation.
const MAX_DEPTH: usize = 10;

/// Minimum length before a string is considered for base64 collapsing.
const BASE64_MIN_LEN: usize = 500;

/// Field names whose values are always scrubbed, compared case-insensitively.
const SCRUB_FIELDS: &[&str] = &[
    "auth",
    "access_token",
    "refresh_token",
    "client_secret",
    "token",
    "password",
    "key",
    "secret",
    "code",
    "authorization",
];

static DATA_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^data:image/([a-zA-Z0-9.+-]+);base64,").expect("valid regex"));

fn is_scrubbed_field(name: &str) -> bool {
    SCRUB_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

/// Redact a structured payload.
///
/// Returns a copy with scrubbed fields replaced by [`PLACEHOLDER`], URLs
/// rewritten so sensitive query parameters carry the placeholder, and large
/// base64 payloads collapsed to a summary.
pub fn redact_value(value: &Value) -> Value {
    redact_at(value, 0)
}

fn redact_at(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String("[MAX DEPTH]".into());
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                if is_scrubbed_field(k) {
                    out.insert(k.clone(), Value::String(PLACEHOLDER.into()));
                } else {
                    out.insert(k.clone(), redact_at(v, depth + 1));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_at(v, depth + 1)).collect())
        }
        Value::String(s) => Value::String(redact_str(s)),
        other => other.clone(),
    }
}

/// Redact a single string value: URL query parameters, then base64 blobs.
pub fn redact_str(s: &str) -> String {
    if let Some(rewritten) = redact_url(s) {
        return rewritten;
    }
    if s.len() > BASE64_MIN_LEN {
        if let Some(caps) = DATA_IMAGE_RE.captures(s) {
            return format!(
                "[IMAGE BASE64 DATA type={}, length={}]",
                &caps[1],
                s.len()
            );
        }
        if looks_like_base64(s) {
            return format!("[BASE64 DATA length={}]", s.len());
        }
    }
    s.to_string()
}

/// Rewrite sensitive query parameters of a URL, preserving the rest.
///
/// Returns `None` when the string is not an absolute URL or carries no
/// sensitive parameters, so plain strings pass through untouched.
fn redact_url(s: &str) -> Option<String> {
    if !(s.starts_with("http://") || s.starts_with("https://")) {
        return None;
    }
    let url = Url::parse(s).ok()?;
    if !url.query_pairs().any(|(k, _)| is_scrubbed_field(&k)) {
        return None;
    }
    let mut rewritten = url.clone();
    {
        let mut serializer = rewritten.query_pairs_mut();
        serializer.clear();
        for (k, v) in url.query_pairs() {
            if is_scrubbed_field(&k) {
                serializer.append_pair(&k, PLACEHOLDER);
            } else {
                serializer.append_pair(&k, &v);
            }
        }
    }
    Some(rewritten.to_string())
}

fn looks_like_base64(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'\r' | b'\n'))
}

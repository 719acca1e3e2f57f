//! PHP-style bracket-notation form encoding
//!
//! The server parses request bodies and query strings with PHP semantics:
//! nested structures flatten to `parent[child][0]=value` pairs. Booleans map
//! to `1`/`0`, nulls to the empty string, arrays to stringified index keys.
//! Emission follows the insertion order of the source map; maps preserve
//! insertion order via serde_json's `preserve_order` feature.
//!
//! `encode` is pure and is used both for POST bodies and GET query strings.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde_json::{Map, Value};

/// Escape set for keys and values: RFC 3986 unreserved characters plus the
/// brackets the server's parser expects to see raw.
const FORM_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'[')
    .remove(b']')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Flatten a parameter tree into ordered `(bracket-key, value)` pairs.
///
/// Non-object roots produce no pairs; the wire format has no representation
/// for a bare scalar body.
pub fn encode_pairs(params: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Value::Object(map) = params {
        for (key, value) in map {
            push_pairs(&mut pairs, key.clone(), value);
        }
    }
    pairs
}

/// Encode a parameter tree into a form-encoded string.
pub fn encode(params: &Value) -> String {
    encode_pairs(params)
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, FORM_ESCAPE),
                utf8_percent_encode(v, FORM_ESCAPE)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn push_pairs(pairs: &mut Vec<(String, String)>, key: String, value: &Value) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                push_pairs(pairs, format!("{key}[{k}]"), v);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                push_pairs(pairs, format!("{key}[{i}]"), v);
            }
        }
        scalar => pairs.push((key, scalar_text(scalar))),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Bool(true) => "1".into(),
        Value::Bool(false) => "0".into(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        // Containers are handled by push_pairs
        Value::Object(_) | Value::Array(_) => String::new(),
    }
}

/// Parse a form-encoded string back into a parameter tree.
///
/// Every leaf decodes to a string and indexed keys decode to maps keyed by
/// the index text, so `encode(decode(q)) == q` for any query `encode`
/// produced.
pub fn decode(query: &str) -> Value {
    let mut root = Map::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode_str(raw_key).decode_utf8_lossy().to_string();
        let value = percent_decode_str(raw_value)
            .decode_utf8_lossy()
            .to_string();
        let segments = split_key(&key);
        if !segments.is_empty() {
            insert(&mut root, &segments, value);
        }
    }
    Value::Object(root)
}

/// `a[b][0]` -> `["a", "b", "0"]`. Malformed brackets fall back to literal
/// segment text.
fn split_key(key: &str) -> Vec<String> {
    match key.find('[') {
        None => vec![key.to_string()],
        Some(open) => {
            let mut segments = vec![key[..open].to_string()];
            let mut rest = &key[open..];
            while let Some(close) = rest.find(']') {
                segments.push(rest[1..close].to_string());
                rest = &rest[close + 1..];
                if !rest.starts_with('[') {
                    break;
                }
            }
            segments
        }
    }
}

fn insert(map: &mut Map<String, Value>, segments: &[String], value: String) {
    let Some((head, tail)) = segments.split_first() else {
        return;
    };
    if tail.is_empty() {
        // Duplicate keys overwrite previous values within the same call
        map.insert(head.clone(), Value::String(value));
        return;
    }
    let entry = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(child) = entry {
        insert(child, tail, value);
    }
}

//! Limit-breach detection for server responses
//!
//! The server enforces its own leaky bucket and reports a breach three ways:
//! the `QUERY_LIMIT_EXCEEDED` domain error, a description mentioning the
//! limit, or a bare HTTP 503. Any of them puts the tenant into a hard block.

use serde_json::Value;

/// Description substring indicating a server-side limit breach.
const LIMIT_PATTERN: &str = "limit exceeded";

/// Whether a response indicates the server rejected the request for quota.
pub fn limit_exceeded(status: u16, body: &Value) -> bool {
    if status == 503 {
        return true;
    }
    if body.get("error").and_then(Value::as_str) == Some("QUERY_LIMIT_EXCEEDED") {
        return true;
    }
    if let Some(description) = body.get("error_description").and_then(Value::as_str) {
        if description.to_lowercase().contains(LIMIT_PATTERN) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_query_limit_exceeded_error() {
        let body = json!({"error": "QUERY_LIMIT_EXCEEDED"});
        assert!(limit_exceeded(400, &body));
    }

    #[test]
    fn detects_description_substring() {
        let body = json!({"error": "OTHER", "error_description": "Request limit exceeded!"});
        assert!(limit_exceeded(400, &body));
    }

    #[test]
    fn description_match_is_case_insensitive() {
        let body = json!({"error_description": "LIMIT EXCEEDED for portal"});
        assert!(limit_exceeded(200, &body));
    }

    #[test]
    fn detects_http_503_regardless_of_body() {
        assert!(limit_exceeded(503, &json!({})));
        assert!(limit_exceeded(503, &Value::Null));
    }

    #[test]
    fn ordinary_errors_do_not_trip() {
        assert!(!limit_exceeded(400, &json!({"error": "ERROR_METHOD_NOT_FOUND"})));
        assert!(!limit_exceeded(401, &json!({"error": "expired_token"})));
        assert!(!limit_exceeded(200, &json!({"result": {"ID": "1"}})));
        assert!(!limit_exceeded(500, &json!({})));
    }
}

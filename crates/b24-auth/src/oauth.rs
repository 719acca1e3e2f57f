//! OAuth token-refresh wire details
//!
//! Bitrix24 refreshes go to a library-wide default endpoint unless the
//! portal's credential record names its own OAuth server. The derivation is
//! deliberately strict: only `https://oauth.bitrix<digits?>.{tech,info}/rest`
//! converts, by dropping `/rest` and appending `/oauth/token/`. Anything
//! else (trailing slash, extra path, http scheme, unknown TLD) falls back to
//! the default. Operators pointing at a regional OAuth server must match
//! that exact shape.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

/// Library-wide token endpoint used when no portal-specific server is known.
pub const DEFAULT_OAUTH_ENDPOINT: &str = "https://oauth.bitrix.info/oauth/token/";

static SERVER_ENDPOINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://oauth\.bitrix\d*\.(tech|info)/rest$").expect("valid regex")
});

/// Resolve the token endpoint for a portal.
pub fn derive_oauth_endpoint(server_endpoint: Option<&str>) -> String {
    match server_endpoint {
        Some(endpoint) if SERVER_ENDPOINT_RE.is_match(endpoint) => {
            format!("{}/oauth/token/", endpoint.trim_end_matches("/rest"))
        }
        _ => DEFAULT_OAUTH_ENDPOINT.to_string(),
    }
}

/// Query parameters for a `grant_type=refresh_token` exchange.
///
/// Emission order matters for the resulting URL, so the map is built in the
/// order the server documents.
pub fn refresh_params(client_id: &str, client_secret: &str, refresh_token: &str) -> Value {
    json!({
        "client_id": client_id,
        "grant_type": "refresh_token",
        "client_secret": client_secret,
        "refresh_token": refresh_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_from_matching_server_endpoint() {
        assert_eq!(
            derive_oauth_endpoint(Some("https://oauth.bitrix.info/rest")),
            "https://oauth.bitrix.info/oauth/token/"
        );
        assert_eq!(
            derive_oauth_endpoint(Some("https://oauth.bitrix24.tech/rest")),
            "https://oauth.bitrix24.tech/oauth/token/"
        );
        assert_eq!(
            derive_oauth_endpoint(Some("https://oauth.bitrix2.tech/rest")),
            "https://oauth.bitrix2.tech/oauth/token/"
        );
    }

    #[test]
    fn falls_back_on_shape_mismatch() {
        for endpoint in [
            "https://oauth.bitrix.info/rest/",
            "https://oauth.bitrix.info/rest/extra",
            "http://oauth.bitrix.info/rest",
            "https://oauth.bitrix.example.com/rest",
            "https://oauth.bitrix.org/rest",
            "https://portal.bitrix24.com/rest",
            "",
        ] {
            assert_eq!(
                derive_oauth_endpoint(Some(endpoint)),
                DEFAULT_OAUTH_ENDPOINT,
                "endpoint {endpoint:?} must not derive"
            );
        }
    }

    #[test]
    fn falls_back_when_absent() {
        assert_eq!(derive_oauth_endpoint(None), DEFAULT_OAUTH_ENDPOINT);
    }

    #[test]
    fn refresh_params_keep_documented_order() {
        let params = refresh_params("C", "S", "R");
        let keys: Vec<&str> = params.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["client_id", "grant_type", "client_secret", "refresh_token"]
        );
        assert_eq!(params["grant_type"], "refresh_token");
        assert_eq!(params["refresh_token"], "R");
    }
}

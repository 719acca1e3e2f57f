//! Credential record for one installed portal
//!
//! A record is the persisted OAuth state for a single tenant, keyed by its
//! DNS domain. Records are created by the install handler, mutated only by
//! the token refresh path, and read as immutable snapshots for the duration
//! of one method call.

use serde::{Deserialize, Serialize};

/// Default access-token lifetime when the install payload omits it.
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

/// OAuth state for one portal.
///
/// `expires_in` is the server-reported lifetime in seconds (a delta, not an
/// absolute timestamp). The refresh path replaces the whole record rather
/// than patching individual fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Bearer token sent as the `auth` parameter of every method call
    #[serde(default)]
    pub access_token: String,
    /// Token exchanged for a new access token on expiry
    #[serde(default)]
    pub refresh_token: String,
    /// Portal DNS domain, the primary key
    #[serde(default)]
    pub domain: String,
    /// Absolute URL prefix for method invocations, `https://<domain>/rest/`
    #[serde(default)]
    pub client_endpoint: String,
    /// Application token delivered with install events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_token: Option<String>,
    /// Opaque portal member identifier
    #[serde(default)]
    pub member_id: String,
    /// Subscription status string as reported by the server
    #[serde(default)]
    pub status: String,
    /// Access-token lifetime in seconds
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    /// Tenant-specific OAuth server, used to derive the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_endpoint: Option<String>,
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN
}

impl CredentialRecord {
    /// A record is usable iff all four identifying fields are present.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
            && !self.domain.is_empty()
            && !self.refresh_token.is_empty()
            && !self.client_endpoint.is_empty()
    }

    /// Merge a refresh-response delta into this record.
    ///
    /// The token endpoint never returns the portal domain, and may omit
    /// fields it considers unchanged. The pre-existing value wins for every
    /// field the delta leaves empty; the domain always survives.
    pub fn merged_with(&self, delta: CredentialRecord) -> CredentialRecord {
        CredentialRecord {
            access_token: non_empty_or(delta.access_token, &self.access_token),
            refresh_token: non_empty_or(delta.refresh_token, &self.refresh_token),
            domain: self.domain.clone(),
            client_endpoint: non_empty_or(delta.client_endpoint, &self.client_endpoint),
            application_token: delta
                .application_token
                .or_else(|| self.application_token.clone()),
            member_id: non_empty_or(delta.member_id, &self.member_id),
            status: non_empty_or(delta.status, &self.status),
            expires_in: delta.expires_in,
            server_endpoint: delta
                .server_endpoint
                .or_else(|| self.server_endpoint.clone()),
        }
    }
}

fn non_empty_or(candidate: String, fallback: &str) -> String {
    if candidate.is_empty() {
        fallback.to_string()
    } else {
        candidate
    }
}

/// Lookup key identifying the tenant a call is made on behalf of.
///
/// Carries at least the domain; the member id helps stores that key by
/// installation rather than by portal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialHint {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
}

impl CredentialHint {
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            member_id: None,
        }
    }
}

//! Install-event handling
//!
//! Turns the HTTP payload Bitrix24 delivers on application install into the
//! tenant's initial credential record and persists it. Two shapes exist:
//!
//! - Headless (server) apps receive an `ONAPPINSTALL` event whose nested
//!   `auth` object already is a complete record.
//! - UI apps receive a `PLACEMENT=DEFAULT` page load with flat upper-case
//!   fields that must be reassembled into a record.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::record::{CredentialRecord, DEFAULT_EXPIRES_IN};
use crate::storage::CredentialStorage;

/// Outcome of a handled install event.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallResult {
    /// True for headless (`ONAPPINSTALL`) installs, false for UI installs
    pub rest_only: bool,
    /// Whether the record reached the credential store
    pub install: bool,
    /// The record that was written
    pub auth: CredentialRecord,
}

/// Handle an install payload and persist the resulting credential record.
pub async fn handle_install(
    payload: &Value,
    storage: &dyn CredentialStorage,
) -> Result<InstallResult> {
    if payload.get("event").and_then(Value::as_str) == Some("ONAPPINSTALL") {
        let auth = payload
            .get("auth")
            .ok_or_else(|| Error::InstallPayload("ONAPPINSTALL event without auth".into()))?;
        let record: CredentialRecord = serde_json::from_value(auth.clone())
            .map_err(|e| Error::InstallPayload(format!("malformed auth record: {e}")))?;
        storage.write(&record).await?;
        return Ok(InstallResult {
            rest_only: true,
            install: true,
            auth: record,
        });
    }

    if payload.get("PLACEMENT").and_then(Value::as_str) == Some("DEFAULT") {
        let record = record_from_placement(payload)?;
        storage.write(&record).await?;
        return Ok(InstallResult {
            rest_only: false,
            install: true,
            auth: record,
        });
    }

    Err(Error::InstallPayload(
        "payload is neither an ONAPPINSTALL event nor a DEFAULT placement".into(),
    ))
}

fn record_from_placement(payload: &Value) -> Result<CredentialRecord> {
    let access_token = require_str(payload, "AUTH_ID")?;
    let domain = require_str(payload, "DOMAIN")?;

    Ok(CredentialRecord {
        access_token,
        expires_in: int_or_default(payload.get("AUTH_EXPIRES"), DEFAULT_EXPIRES_IN),
        application_token: opt_str(payload, "APP_SID"),
        refresh_token: opt_str(payload, "REFRESH_ID").unwrap_or_default(),
        client_endpoint: format!("https://{domain}/rest/"),
        domain,
        member_id: opt_str(payload, "member_id").unwrap_or_default(),
        status: opt_str(payload, "status").unwrap_or_default(),
        server_endpoint: None,
    })
}

fn require_str(payload: &Value, field: &str) -> Result<String> {
    match payload.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(Error::InstallPayload(format!("missing required field {field}"))),
    }
}

fn opt_str(payload: &Value, field: &str) -> Option<String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Expiry arrives as an integer or a numeric string depending on the portal.
fn int_or_default(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.parse().unwrap_or(default),
        _ => default,
    }
}

//! Secret wrapper for string-shaped OAuth material
//!
//! The client secret and tokens held in configuration are all opaque
//! strings, so the wrapper is concrete rather than generic. The inner value
//! is zeroized on drop and never reachable through Debug or Display; the
//! only way to read it is an explicit `expose()` at the call site that
//! actually puts it on the wire.

use std::fmt;

use zeroize::Zeroize;

/// An opaque credential string, redacted in Debug/Display/logs.
pub struct Secret(String);

impl Secret {
    /// Wrap a credential string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read the raw value (use sparingly, at the wire boundary only).
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the credential is absent.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl Clone for Secret {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

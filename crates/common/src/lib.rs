//! Shared types for the b24-rs workspace

mod redact;
mod secret;

pub use redact::{PLACEHOLDER, redact_str, redact_value};
pub use secret::Secret;

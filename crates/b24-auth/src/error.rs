//! Error types for credential operations

/// Errors from credential storage and install handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    Parse(String),

    #[error("invalid credential record: {0}")]
    InvalidRecord(String),

    #[error("install payload error: {0}")]
    InstallPayload(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;

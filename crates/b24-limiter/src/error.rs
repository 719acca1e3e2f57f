//! Error types for admission control

/// Errors from limiter operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("admission queue for {domain} is full ({queued} waiting)")]
    QueueOverflow { domain: String, queued: usize },

    #[error("limiter for {0} shut down while a request was waiting")]
    Closed(String),
}

/// Result alias for limiter operations.
pub type Result<T> = std::result::Result<T, Error>;

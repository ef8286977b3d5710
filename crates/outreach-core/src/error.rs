//! Outreach error types.

use thiserror::Error;

/// Errors raised by collaborators and configuration loading.
///
/// Engine entry points never return these to the business operation that
/// triggered them; they are logged and collapsed into outcomes.
#[derive(Debug, Error)]
pub enum OutreachError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OutreachError>;

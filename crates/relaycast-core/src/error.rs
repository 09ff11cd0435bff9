//! Error taxonomy shared by every Relaycast crate.

use thiserror::Error;

/// Relaycast error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Durable store unreachable or a write failed. Aborts the current run.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Transport rejected a single send. The step is skipped.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Presence update failed. Never fatal.
    #[error("presence error: {0}")]
    Presence(String),

    /// Malformed or missing sequence / target definition.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl RelayError {
    /// Persistence failures threaten the resume invariant and are surfaced loudly.
    pub fn is_persistence(&self) -> bool {
        matches!(self, RelayError::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

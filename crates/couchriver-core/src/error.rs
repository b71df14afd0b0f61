//! Error types for the couchriver pipeline.

use thiserror::Error;

/// Errors that can occur while running a river.
#[derive(Debug, Error)]
pub enum RiverError {
    #[error("feed error: {0}")]
    Feed(String),

    #[error("checkpoint storage error: {0}")]
    Storage(String),

    #[error("bulk sink error: {0}")]
    Sink(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("failed to parse change line: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The shutdown signal interrupted a blocking operation.
    #[error("river is shutting down")]
    Shutdown,

    #[error("{0}")]
    Other(String),
}

impl RiverError {
    /// Returns `true` if the error is transient and the caller should back off and retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Feed(_) | Self::Storage(_))
    }

    /// Returns `true` if the error was caused by shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

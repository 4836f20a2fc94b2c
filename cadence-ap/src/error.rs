//! Error types for cadence-ap

use thiserror::Error;

/// Main error type for cadence-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Errors from the shared crate (database, config)
    #[error(transparent)]
    Common(#[from] cadence_common::Error),

    /// Non-blocking dequeue on an empty queue
    #[error("Queue is empty")]
    QueueEmpty,

    /// Voice transport failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unknown channel
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub(crate) fn transport(err: anyhow::Error) -> Self {
        Error::Transport(format!("{err:#}"))
    }
}

/// Convenience Result type using cadence-ap Error
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the program director

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Error from the shared crate (persistence, config)
    #[error(transparent)]
    Common(#[from] cadence_common::Error),

    /// Discovery weights could not be parsed
    #[error("Invalid discovery weights: {0}")]
    InvalidWeights(String),

    /// External collaborator failure that could not be absorbed
    #[error("Provider error: {0}")]
    Provider(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidWeights(err.to_string())
    }
}

//! Error types for redistribution.

use sluice_transport::TransportError;
use thiserror::Error;

/// Errors raised by redistribution strategies and channels.
#[derive(Debug, Error)]
pub enum RedistError {
    /// The channel or the data handed to it cannot work together.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A chunk could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A destination saw traffic that disagrees with what was announced.
    #[error("protocol violation on channel {channel}: {reason}")]
    ProtocolViolation {
        /// Channel identifier.
        channel: u32,
        /// What went wrong.
        reason: String,
    },

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<bincode::Error> for RedistError {
    fn from(err: bincode::Error) -> Self {
        RedistError::Serialization(err.to_string())
    }
}

/// Result alias for redistribution operations.
pub type RedistResult<T> = std::result::Result<T, RedistError>;

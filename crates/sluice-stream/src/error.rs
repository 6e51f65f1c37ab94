//! Error types for streams.

use sluice_redist::RedistError;
use sluice_transport::TransportError;
use thiserror::Error;

use crate::frame::FrameId;

/// Errors raised by frame selection, frame storage and stream coordination.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Invalid policy name, frequency pair, tier list or topology.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every storage tier is full.
    #[error("storage full: {tiers} tier(s) hold {frames} frame(s), cannot insert frame {id}")]
    Capacity {
        /// Frame that could not be stored.
        id: FrameId,
        /// Number of tiers.
        tiers: usize,
        /// Frames currently stored.
        frames: usize,
    },

    /// The frame is already stored.
    #[error("frame {0} is already stored")]
    DuplicateFrame(FrameId),

    /// The frame is not stored.
    #[error("frame {0} not found")]
    FrameNotFound(FrameId),

    /// The stream can no longer make progress, such as a frame chosen
    /// after upstream has terminated.
    #[error("stream stalled: {0}")]
    Stalled(String),

    /// Rank used in a role it does not hold.
    #[error("rank {rank} is not a {role} of this stream")]
    WrongRole {
        /// Calling rank.
        rank: u32,
        /// Role the call requires.
        role: &'static str,
    },

    /// File tier or manifest failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Config(String),

    /// Redistribution failure.
    #[error("redistribution error: {0}")]
    Redist(#[from] RedistError),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Storage(err.to_string())
    }
}

impl From<toml::de::Error> for StreamError {
    fn from(err: toml::de::Error) -> Self {
        StreamError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Config(err.to_string())
    }
}

/// Result alias for stream operations.
pub type StreamResult<T> = std::result::Result<T, StreamError>;

//! Error types for the transport layer.

use thiserror::Error;

use crate::Rank;

/// Errors raised while moving messages between ranks.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The destination or source rank is outside the communicator.
    #[error("unknown rank {rank} (communicator size {size})")]
    UnknownRank {
        /// Offending rank.
        rank: Rank,
        /// Number of ranks in the communicator.
        size: u32,
    },

    /// A frame could not be decoded.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Decoder diagnostic.
        reason: String,
    },

    /// The frame did not start with the expected magic number.
    #[error("invalid magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic {
        /// Expected magic.
        expected: u32,
        /// Received magic.
        got: u32,
    },

    /// The peer speaks a different wire version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Local version.
        expected: u8,
        /// Peer version.
        got: u8,
    },

    /// The payload checksum did not match the header.
    #[error("checksum mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received payload.
        computed: u32,
    },

    /// The payload exceeds the maximum frame size.
    #[error("payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge {
        /// Payload size.
        size: u64,
        /// Maximum accepted size.
        max_size: u64,
    },

    /// A peer did not accept a connection in time.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Peer address.
        addr: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The local mailbox was shut down while a receive was pending.
    #[error("transport disconnected")]
    Disconnected,

    /// The calling rank is not a member of the group it tried to use.
    #[error("rank {rank} is not a member of the group")]
    NotInGroup {
        /// Calling rank.
        rank: Rank,
    },

    /// A collective payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying socket error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for TransportError {
    fn from(err: bincode::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

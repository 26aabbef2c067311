//! Protocol error types

use thiserror::Error;

/// Protocol error types
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Message too large
    #[error("Message size {0} exceeds maximum {1}")]
    MessageTooLarge(usize, usize),

    /// Invalid message or block format
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// An offset update would move backwards
    #[error("Offset regression: current {current}, requested {requested}")]
    OffsetRegression { current: u64, requested: u64 },

    /// Block framing is truncated or corrupt at the given byte position
    #[error("Corrupt block at byte {position}: {reason}")]
    CorruptBlock { position: usize, reason: String },
}

impl From<postcard::Error> for ProtocolError {
    fn from(e: postcard::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

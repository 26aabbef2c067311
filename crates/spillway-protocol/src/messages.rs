//! Poll/ack message types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProtocolError, Result};
use crate::types::{SourceId, StreamOffset};
use crate::{MAX_MESSAGE_SIZE, PROTOCOL_VERSION, WIRE_HEADER_SIZE};

/// Worker-to-producer requests
///
/// # Stability
///
/// **WARNING**: Variant order must remain stable for postcard serialization compatibility.
/// Adding new variants should only be done at the end of the enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Ask for the next block after the acknowledged offset.
    ///
    /// At most one poll may be outstanding per source.
    Poll { source: SourceId },

    /// Every byte before `offset` has been consumed; the producer may reclaim it.
    ///
    /// `offset` must equal the end of the most recently delivered block.
    Ack {
        source: SourceId,
        offset: StreamOffset,
    },
}

impl Request {
    pub fn source(&self) -> SourceId {
        match self {
            Request::Poll { source } | Request::Ack { source, .. } => *source,
        }
    }
}

/// Reason a producer refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Ack offset mismatch, ack without a delivered block, or similar misuse
    ProtocolViolation,
    /// The producer has never heard of the source
    UnknownSource,
    /// The source was advertised once but is gone (partition moved, export disabled)
    SourceInvalidated,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ProtocolViolation => write!(f, "protocol violation"),
            ErrorKind::UnknownSource => write!(f, "unknown source"),
            ErrorKind::SourceInvalidated => write!(f, "source invalidated"),
        }
    }
}

/// Producer-to-worker responses
///
/// # Stability
///
/// **WARNING**: Variant order must remain stable for postcard serialization compatibility.
/// Adding new variants should only be done at the end of the enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Answer to a poll. An empty payload means no new data yet.
    PollResponse {
        source: SourceId,
        start_offset: StreamOffset,
        #[serde(with = "crate::serde_utils::bytes_serde")]
        payload: Bytes,
    },

    /// Ack accepted
    AckResponse {
        source: SourceId,
        offset: StreamOffset,
    },

    /// Request refused
    Error {
        source: SourceId,
        kind: ErrorKind,
        message: String,
    },
}

impl Response {
    pub fn source(&self) -> SourceId {
        match self {
            Response::PollResponse { source, .. }
            | Response::AckResponse { source, .. }
            | Response::Error { source, .. } => *source,
        }
    }

    /// True for a poll response carrying no data
    pub fn is_idle(&self) -> bool {
        matches!(self, Response::PollResponse { payload, .. } if payload.is_empty())
    }

    pub fn error(source: SourceId, kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            source,
            kind,
            message: message.into(),
        }
    }
}

macro_rules! impl_codec {
    ($ty:ty) => {
        impl $ty {
            /// Serialize to bytes (postcard format)
            #[inline]
            pub fn to_bytes(&self) -> Result<Vec<u8>> {
                Ok(postcard::to_allocvec(self)?)
            }

            /// Deserialize from bytes (postcard format)
            #[inline]
            pub fn from_bytes(data: &[u8]) -> Result<Self> {
                postcard::from_bytes(data)
                    .map_err(|e| ProtocolError::Deserialization(e.to_string()))
            }

            /// Serialize with the version prefix
            ///
            /// Wire format: `[version byte][payload]`
            ///
            /// # Errors
            ///
            /// Returns [`ProtocolError::MessageTooLarge`] if the serialized message
            /// exceeds [`MAX_MESSAGE_SIZE`].
            pub fn to_wire(&self) -> Result<Vec<u8>> {
                let mut result = Vec::with_capacity(WIRE_HEADER_SIZE + 64);
                result.push(PROTOCOL_VERSION);
                let result = postcard::to_extend(self, result)?;
                if result.len() > MAX_MESSAGE_SIZE {
                    return Err(ProtocolError::MessageTooLarge(result.len(), MAX_MESSAGE_SIZE));
                }
                Ok(result)
            }

            /// Deserialize a message produced by `to_wire`
            pub fn from_wire(data: &[u8]) -> Result<Self> {
                if data.len() > MAX_MESSAGE_SIZE {
                    return Err(ProtocolError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
                }
                let (&version, payload) = data.split_first().ok_or_else(|| {
                    ProtocolError::InvalidFormat("Wire data too short (need version byte)".into())
                })?;
                if version != PROTOCOL_VERSION {
                    return Err(ProtocolError::VersionMismatch {
                        expected: PROTOCOL_VERSION,
                        actual: version,
                    });
                }
                Self::from_bytes(payload)
            }
        }
    };
}

impl_codec!(Request);
impl_codec!(Response);

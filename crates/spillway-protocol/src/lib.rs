//! Spillway Export Protocol
//!
//! This crate defines the types shared between the partition-side producer of
//! committed rows and the export stream workers that drain them:
//!
//! - [`DataSourceDescriptor`] / [`SourceId`]: one table's stream on one partition
//! - [`StreamOffset`]: byte offset acknowledged per source
//! - [`BlockBuilder`] / [`RowIter`]: framing of serialized rows inside a block
//! - [`Request`] / [`Response`]: the poll/ack message exchange
//!
//! # Protocol Stability
//!
//! The enum variant order is significant for postcard serialization. Changes to variant
//! order will break wire compatibility between producers and workers.
//!
//! # Example
//!
//! ```rust,ignore
//! use spillway_protocol::{Request, Response, SourceId};
//!
//! let poll = Request::Poll { source: SourceId::new(3, 17) };
//! let bytes = poll.to_wire()?;
//!
//! let response = Response::from_wire(&reply)?;
//! ```

mod block;
mod error;
mod messages;
pub mod serde_utils;
mod types;


pub use block::{BlockBuilder, RowIter, ROW_HEADER_SIZE};
pub use error::{ProtocolError, Result};
pub use messages::{ErrorKind, Request, Response};
pub use types::{
    ColumnSchema, ColumnType, ColumnValue, DataSourceDescriptor, SourceId, StreamOffset,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the wire header (version byte)
pub const WIRE_HEADER_SIZE: usize = 1;

/// Maximum message size (64 MiB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Worst-case bytes a `PollResponse` frame adds around its payload: version
/// byte and variant tag, plus varints for the two source ids, the offset and
/// the payload length
pub const POLL_RESPONSE_OVERHEAD: usize = WIRE_HEADER_SIZE + 1 + 5 + 5 + 10 + 10;

/// Largest block payload that still fits in one `PollResponse`
pub const MAX_BLOCK_SIZE: usize = MAX_MESSAGE_SIZE - POLL_RESPONSE_OVERHEAD;

//! Producer side of the poll/ack protocol
//!
//! [`ExportProducer`] is the boundary to the partition that owns committed
//! rows. [`StreamBuffer`] is an in-memory implementation: the engine appends
//! sealed blocks per source, workers poll and acknowledge them.
//!
//! Guarantees:
//! - a block is never discarded before it is acknowledged,
//! - polling from an unacknowledged offset returns the same bytes again,
//! - an ack is accepted only for the end of the block delivered last.

use crate::error::{ConnectError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use spillway_protocol::{
    BlockBuilder, ColumnValue, DataSourceDescriptor, ErrorKind, ProtocolError, Request, Response,
    SourceId, StreamOffset, MAX_BLOCK_SIZE,
};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Anything that can answer poll/ack requests
pub trait ExportProducer: Send + Sync {
    fn handle(&self, request: Request) -> Response;
}

#[derive(Debug)]
struct SourceStream {
    descriptor: DataSourceDescriptor,
    acked: StreamOffset,
    /// End of the last appended block
    high_water: StreamOffset,
    /// Unacknowledged blocks; the front one starts at `acked`
    blocks: VecDeque<Bytes>,
    /// End offset of the block handed out by the last poll
    delivered: Option<StreamOffset>,
    invalidated: bool,
}

impl SourceStream {
    fn new(descriptor: DataSourceDescriptor) -> Self {
        Self {
            descriptor,
            acked: StreamOffset::ZERO,
            high_water: StreamOffset::ZERO,
            blocks: VecDeque::new(),
            delivered: None,
            invalidated: false,
        }
    }
}

/// In-memory per-source block queues
#[derive(Debug, Default)]
pub struct StreamBuffer {
    sources: Mutex<HashMap<SourceId, SourceStream>>,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a source available for export. Re-advertising a live source is a
    /// no-op; re-advertising an invalidated one starts a fresh stream.
    pub fn advertise(&self, descriptor: DataSourceDescriptor) {
        let id = descriptor.source_id();
        let mut sources = self.sources.lock();
        match sources.get(&id) {
            Some(existing) if !existing.invalidated => {}
            _ => {
                debug!(source = %id, table = %descriptor.table_name, "Source advertised");
                sources.insert(id, SourceStream::new(descriptor));
            }
        }
    }

    /// Seal a block of already-framed rows. Returns the new high-water offset.
    pub fn append_block(&self, source: SourceId, payload: Bytes) -> Result<StreamOffset> {
        let mut sources = self.sources.lock();
        let stream = sources
            .get_mut(&source)
            .filter(|s| !s.invalidated)
            .ok_or_else(|| ConnectError::config(format!("source {} is not advertised", source)))?;

        if payload.is_empty() {
            return Ok(stream.high_water);
        }
        // a larger block could never be delivered and would stall the source
        if payload.len() > MAX_BLOCK_SIZE {
            warn!(
                source = %source,
                size = payload.len(),
                limit = MAX_BLOCK_SIZE,
                "Block too large for a poll response"
            );
            return Err(ProtocolError::MessageTooLarge(payload.len(), MAX_BLOCK_SIZE).into());
        }
        stream.high_water = stream.high_water.end_of_block(payload.len())?;
        stream.blocks.push_back(payload);
        Ok(stream.high_water)
    }

    /// Encode committed rows as one block and seal it
    pub fn commit_rows(&self, source: SourceId, rows: &[Vec<ColumnValue>]) -> Result<StreamOffset> {
        let payload = BlockBuilder::encode(rows.iter().map(|r| r.as_slice()))?;
        self.append_block(source, payload)
    }

    /// Withdraw a source (partition moved, table no longer exported). Pending
    /// blocks are dropped; later polls are answered with `SourceInvalidated`.
    pub fn invalidate(&self, source: SourceId) -> bool {
        let mut sources = self.sources.lock();
        match sources.get_mut(&source) {
            Some(stream) if !stream.invalidated => {
                stream.invalidated = true;
                stream.blocks.clear();
                stream.delivered = None;
                debug!(source = %source, "Source invalidated");
                true
            }
            _ => false,
        }
    }

    pub fn descriptor(&self, source: SourceId) -> Option<DataSourceDescriptor> {
        self.sources.lock().get(&source).map(|s| s.descriptor.clone())
    }

    pub fn acknowledged(&self, source: SourceId) -> Option<StreamOffset> {
        self.sources.lock().get(&source).map(|s| s.acked)
    }

    pub fn high_water(&self, source: SourceId) -> Option<StreamOffset> {
        self.sources.lock().get(&source).map(|s| s.high_water)
    }

    /// Bytes appended but not yet acknowledged
    pub fn pending_bytes(&self, source: SourceId) -> u64 {
        self.sources
            .lock()
            .get(&source)
            .map(|s| s.blocks.iter().map(|b| b.len() as u64).sum())
            .unwrap_or(0)
    }

    fn poll(&self, source: SourceId) -> Response {
        let mut sources = self.sources.lock();
        let Some(stream) = sources.get_mut(&source) else {
            return Response::error(source, ErrorKind::UnknownSource, "source was never advertised");
        };
        if stream.invalidated {
            return Response::error(
                source,
                ErrorKind::SourceInvalidated,
                "source is no longer advertised",
            );
        }

        let payload = stream.blocks.front().cloned().unwrap_or_default();
        stream.delivered = if payload.is_empty() {
            None
        } else {
            Some(StreamOffset::new(stream.acked.get() + payload.len() as u64))
        };
        Response::PollResponse {
            source,
            start_offset: stream.acked,
            payload,
        }
    }

    fn ack(&self, source: SourceId, offset: StreamOffset) -> Response {
        let mut sources = self.sources.lock();
        let Some(stream) = sources.get_mut(&source) else {
            return Response::error(source, ErrorKind::UnknownSource, "source was never advertised");
        };
        if stream.invalidated {
            return Response::error(
                source,
                ErrorKind::SourceInvalidated,
                "source is no longer advertised",
            );
        }

        match stream.delivered {
            Some(expected) if expected == offset => {
                stream.blocks.pop_front();
                stream.acked = offset;
                stream.delivered = None;
                Response::AckResponse { source, offset }
            }
            Some(expected) => {
                warn!(source = %source, offset = %offset, expected = %expected, "Rejecting ack");
                Response::error(
                    source,
                    ErrorKind::ProtocolViolation,
                    format!("ack {} does not match end of delivered block {}", offset, expected),
                )
            }
            None => {
                warn!(source = %source, offset = %offset, "Rejecting ack without delivered block");
                Response::error(
                    source,
                    ErrorKind::ProtocolViolation,
                    format!("ack {} without an outstanding delivered block", offset),
                )
            }
        }
    }
}

impl ExportProducer for StreamBuffer {
    fn handle(&self, request: Request) -> Response {
        match request {
            Request::Poll { source } => self.poll(source),
            Request::Ack { source, offset } => self.ack(source, offset),
        }
    }
}

//! Row decoder trait for export streams
//!
//! A decoder receives the rows of every block delivered for one data source
//! and turns them into some external effect (files, HTTP calls, ...). The
//! export worker owns exactly one decoder per source and drives it:
//!
//! ```text
//! on_block_start ─▶ process_row × N ─▶ on_block_completion ─▶ Ack
//!        │                 │                    │
//!        └──── Restart ────┴──────── Restart ───┴──▶ same block redelivered
//! ```
//!
//! # Redelivery
//!
//! A block that is restarted is delivered again from its first row, so
//! decoders see rows more than once. They must be idempotent or tolerate
//! duplicates. Buffering a block and committing it in `on_block_completion`
//! is the usual way to keep external output free of partial blocks.
//!
//! # Example
//!
//! ```rust,ignore
//! use spillway_connect::prelude::*;
//!
//! struct PrintDecoder;
//!
//! #[async_trait]
//! impl RowDecoder for PrintDecoder {
//!     async fn process_row(&mut self, row: &ExportRow) -> ConnectorResult<DecodeOutcome> {
//!         println!("{:?}", row.values);
//!         Ok(DecodeOutcome::Continue)
//!     }
//!
//!     async fn source_no_longer_advertised(&mut self, _: &DataSourceDescriptor) {}
//! }
//! ```

use crate::error::ConnectorResult;
use async_trait::async_trait;
use spillway_protocol::{ColumnValue, DataSourceDescriptor, SourceId, StreamOffset};

/// What the worker should do after a decoder hook returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Keep going
    Continue,
    /// Stop consuming this source; the block is not acknowledged
    Stop,
    /// Abandon the block without acknowledging it so it is redelivered
    Restart(String),
}

impl DecodeOutcome {
    pub fn restart(reason: impl Into<String>) -> Self {
        Self::Restart(reason.into())
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Position of the block currently being decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub source: SourceId,
    pub start_offset: StreamOffset,
    pub end_offset: StreamOffset,
    /// 0 on first delivery, incremented on every redelivery
    pub redelivery: u32,
}

impl BlockInfo {
    pub fn len(&self) -> u64 {
        self.end_offset.get() - self.start_offset.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_redelivery(&self) -> bool {
        self.redelivery > 0
    }
}

/// One decoded row handed to [`RowDecoder::process_row`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    /// Index of the row within its block
    pub index: usize,
    pub values: Vec<ColumnValue>,
}

impl ExportRow {
    pub fn new(index: usize, values: Vec<ColumnValue>) -> Self {
        Self { index, values }
    }

    pub fn get(&self, column: usize) -> Option<&ColumnValue> {
        self.values.get(column)
    }

    /// Look up a value by column name
    pub fn get_named<'a>(
        &'a self,
        descriptor: &DataSourceDescriptor,
        name: &str,
    ) -> Option<&'a ColumnValue> {
        descriptor
            .columns
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| self.values.get(i))
    }
}

/// Pluggable consumer of one export stream.
///
/// Errors returned from the block hooks and from `process_row` are treated as
/// a decode failure of the block: it is restarted, subject to the worker's
/// restart budget.
#[async_trait]
pub trait RowDecoder: Send {
    /// Called before the first row of every delivery of a block
    async fn on_block_start(&mut self, _block: &BlockInfo) -> ConnectorResult<()> {
        Ok(())
    }

    /// Handle one row
    async fn process_row(&mut self, row: &ExportRow) -> ConnectorResult<DecodeOutcome>;

    /// Called after the last row of a block, before it is acknowledged
    async fn on_block_completion(&mut self, _block: &BlockInfo) -> ConnectorResult<DecodeOutcome> {
        Ok(DecodeOutcome::Continue)
    }

    /// The source is gone or the worker is shutting down.
    ///
    /// Called exactly once per source. Release files, buffers and
    /// connections here.
    async fn source_no_longer_advertised(&mut self, descriptor: &DataSourceDescriptor);
}

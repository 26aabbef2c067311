//! Testing utilities for decoders, importers and transports
//!
//! Mock implementations that record what the runtime did to them, so tests
//! can assert on protocol traffic and delivery counts without a database.
//!
//! # Example
//!
//! ```rust,ignore
//! use spillway_connect::testing::*;
//!
//! #[tokio::test]
//! async fn test_redelivery() {
//!     let decoder = MockDecoder::new().restart_once_at(2);
//!     let probe = decoder.probe();
//!
//!     // run a worker with `decoder` ...
//!
//!     assert_eq!(probe.seen_ids(), vec![1, 2, 1, 2, 3]);
//! }
//! ```

use super::decoder::{BlockInfo, DecodeOutcome, ExportRow, RowDecoder};
use super::importer::{ImportContext, Importer};
use super::writer::RowWriter;
use crate::error::{ConnectorError, ConnectorResult};
use crate::export::transport::ExportTransport;
use crate::format::FormatterBuilder;
use crate::import::ResourceId;
use async_trait::async_trait;
use parking_lot::Mutex;
use spillway_protocol::{ColumnValue, DataSourceDescriptor, Request, Response, StreamOffset};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Mock Decoder
// ============================================================================

#[derive(Debug, Default)]
struct DecoderState {
    rows: Vec<Vec<ColumnValue>>,
    blocks_started: usize,
    blocks_completed: usize,
    no_longer_advertised: usize,
}

/// A decoder that records every row it accepted
#[derive(Debug, Default)]
pub struct MockDecoder {
    state: Arc<Mutex<DecoderState>>,
    /// (row index within the block, restarts left)
    restart_at: Option<(usize, u32)>,
    always_restart: bool,
    stop_after: Option<usize>,
}

impl MockDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a restart when reaching row `index` of a block, once
    pub fn restart_once_at(self, index: usize) -> Self {
        self.restart_at(index, 1)
    }

    /// Request a restart when reaching row `index` of a block, `times` times
    pub fn restart_at(mut self, index: usize, times: u32) -> Self {
        self.restart_at = Some((index, times));
        self
    }

    /// Request a restart at the end of every block
    pub fn always_restart(mut self) -> Self {
        self.always_restart = true;
        self
    }

    /// Stop the source once `rows` rows were accepted in total
    pub fn stop_after_rows(mut self, rows: usize) -> Self {
        self.stop_after = Some(rows);
        self
    }

    /// Shared view on what the decoder saw; stays valid after the decoder is
    /// moved into a worker
    pub fn probe(&self) -> DecoderProbe {
        DecoderProbe {
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl RowDecoder for MockDecoder {
    async fn on_block_start(&mut self, _block: &BlockInfo) -> ConnectorResult<()> {
        self.state.lock().blocks_started += 1;
        Ok(())
    }

    async fn process_row(&mut self, row: &ExportRow) -> ConnectorResult<DecodeOutcome> {
        if let Some((index, left)) = self.restart_at.as_mut() {
            if row.index == *index && *left > 0 {
                *left -= 1;
                return Ok(DecodeOutcome::restart(format!("mock restart at row {}", index)));
            }
        }

        let mut state = self.state.lock();
        state.rows.push(row.values.clone());
        if self.stop_after.is_some_and(|n| state.rows.len() >= n) {
            return Ok(DecodeOutcome::Stop);
        }
        Ok(DecodeOutcome::Continue)
    }

    async fn on_block_completion(&mut self, _block: &BlockInfo) -> ConnectorResult<DecodeOutcome> {
        if self.always_restart {
            return Ok(DecodeOutcome::restart("mock restart at completion"));
        }
        self.state.lock().blocks_completed += 1;
        Ok(DecodeOutcome::Continue)
    }

    async fn source_no_longer_advertised(&mut self, _descriptor: &DataSourceDescriptor) {
        self.state.lock().no_longer_advertised += 1;
    }
}

/// Read side of a [`MockDecoder`]
#[derive(Debug, Clone)]
pub struct DecoderProbe {
    state: Arc<Mutex<DecoderState>>,
}

impl DecoderProbe {
    /// Every accepted row, in order, duplicates included
    pub fn rows(&self) -> Vec<Vec<ColumnValue>> {
        self.state.lock().rows.clone()
    }

    /// First column of every accepted row, where it is an integer
    pub fn seen_ids(&self) -> Vec<i64> {
        self.state
            .lock()
            .rows
            .iter()
            .filter_map(|r| match r.first() {
                Some(ColumnValue::Integer(v)) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn blocks_started(&self) -> usize {
        self.state.lock().blocks_started
    }

    pub fn blocks_completed(&self) -> usize {
        self.state.lock().blocks_completed
    }

    pub fn no_longer_advertised(&self) -> usize {
        self.state.lock().no_longer_advertised
    }
}

// ============================================================================
// Recording Transport
// ============================================================================

/// Shared log of requests sent through a [`RecordingTransport`]
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    requests: Arc<Mutex<Vec<Request>>>,
}

impl RequestLog {
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn polls(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| matches!(r, Request::Poll { .. }))
            .count()
    }

    /// Offsets of every ack, in send order
    pub fn acks(&self) -> Vec<StreamOffset> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| match r {
                Request::Ack { offset, .. } => Some(*offset),
                Request::Poll { .. } => None,
            })
            .collect()
    }
}

/// Transport wrapper that records every request before forwarding it
pub struct RecordingTransport<T> {
    inner: T,
    log: RequestLog,
}

impl<T: ExportTransport> RecordingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            log: RequestLog::default(),
        }
    }

    pub fn log(&self) -> RequestLog {
        self.log.clone()
    }
}

#[async_trait]
impl<T: ExportTransport> ExportTransport for RecordingTransport<T> {
    async fn round_trip(&mut self, request: Request) -> crate::error::Result<Response> {
        self.log.requests.lock().push(request.clone());
        self.inner.round_trip(request).await
    }
}

// ============================================================================
// Memory Row Writer
// ============================================================================

/// Row writer collecting rows per table in memory
#[derive(Debug, Default)]
pub struct MemoryRowWriter {
    tables: Mutex<HashMap<String, Vec<Vec<ColumnValue>>>>,
    fail_next: AtomicUsize,
}

impl MemoryRowWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes with a transient error
    pub fn fail_next(self, n: usize) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Vec<ColumnValue>> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl RowWriter for MemoryRowWriter {
    async fn write_row(&self, table: &str, row: Vec<ColumnValue>) -> ConnectorResult<()> {
        let pending = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(ConnectorError::transient("mock write failure"));
        }
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(())
    }
}

// ============================================================================
// Mock Importer
// ============================================================================

/// Importer that submits a fixed list of records, optionally then waiting
/// for stop like a push source with no more data
#[derive(Debug)]
pub struct MockImporter {
    resource: ResourceId,
    formatter: FormatterBuilder,
    records: Vec<Vec<u8>>,
    wait_for_stop: bool,
    accepts: Arc<AtomicUsize>,
}

impl MockImporter {
    pub fn new(resource: ResourceId) -> Self {
        Self {
            resource,
            formatter: FormatterBuilder::default(),
            records: Vec::new(),
            wait_for_stop: false,
            accepts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Records to submit (builder pattern)
    pub fn with_records<I, R>(mut self, records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        self.records = records.into_iter().map(Into::into).collect();
        self
    }

    /// Formatter configuration (builder pattern)
    pub fn with_formatter(mut self, formatter: FormatterBuilder) -> Self {
        self.formatter = formatter;
        self
    }

    /// Block in `accept` after the records until stop is requested
    pub fn wait_for_stop(mut self) -> Self {
        self.wait_for_stop = true;
        self
    }

    /// Counter of `accept` invocations
    pub fn accept_counter(&self) -> Arc<AtomicUsize> {
        self.accepts.clone()
    }
}

#[async_trait]
impl Importer for MockImporter {
    fn resource_id(&self) -> &ResourceId {
        &self.resource
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn formatter_builder(&self) -> &FormatterBuilder {
        &self.formatter
    }

    async fn accept(&self, ctx: &ImportContext) -> ConnectorResult<()> {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        for record in &self.records {
            if ctx.is_stopped() {
                return Ok(());
            }
            ctx.submit(record).await?;
        }
        if self.wait_for_stop {
            ctx.stopped().await;
        }
        Ok(())
    }
}

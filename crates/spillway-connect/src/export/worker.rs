//! Export stream worker
//!
//! One worker per advertised source. It drives the poll/ack loop against the
//! producer and feeds every delivered row to the source's [`RowDecoder`]:
//!
//! ```text
//!          ┌──────────── empty payload: idle backoff ───────────┐
//!          ▼                                                     │
//!   Poll ──▶ PollResponse ──▶ decode block ──▶ Ack(end) ──▶ AckResponse
//!                                  │
//!                                  └── Restart: backoff, re-poll same block
//! ```
//!
//! Every wait (response, idle backoff, restart backoff) is raced against the
//! worker's [`CancellationToken`], so invalidation is observed immediately and
//! no further messages are sent after it.

use crate::error::{ConnectError, ConnectorStatus};
use crate::export::transport::ExportTransport;
use crate::metrics::{ExportMetrics, ExportMetricsSnapshot};
use crate::traits::decoder::{BlockInfo, DecodeOutcome, ExportRow, RowDecoder};
use crate::traits::retry::{RetryConfig, RetryGuard};
use spillway_protocol::{
    DataSourceDescriptor, ErrorKind, Request, Response, RowIter, SourceId, StreamOffset,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Worker tuning
#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Pause after an empty poll before polling again
    pub idle_backoff: Duration,
    /// Budget for consecutive restarts of the same block
    pub restart: RetryConfig,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(100),
            restart: RetryConfig::default(),
        }
    }
}

impl ExportSettings {
    /// Set the idle backoff (builder pattern)
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// Set the restart budget (builder pattern)
    pub fn with_restart(mut self, restart: RetryConfig) -> Self {
        self.restart = restart;
        self
    }
}

/// Why a worker stopped
#[derive(Debug)]
pub enum WorkerExit {
    /// The decoder asked to stop consuming the source
    Stopped,
    /// The source was withdrawn (cancelled or reported invalid by the producer)
    Invalidated,
    /// Protocol violation, transport failure or restart budget spent
    Failed(ConnectError),
}

impl WorkerExit {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Status reported for a worker that ended this way
    pub fn status(&self) -> ConnectorStatus {
        match self {
            Self::Stopped | Self::Invalidated => ConnectorStatus::Stopped,
            Self::Failed(_) => ConnectorStatus::Failed,
        }
    }
}

/// Final state of a worker run
#[derive(Debug)]
pub struct WorkerReport {
    pub source: SourceId,
    pub exit: WorkerExit,
    /// Last offset the producer accepted an ack for
    pub acknowledged: StreamOffset,
    /// Highest block end seen in a poll response
    pub high_water: StreamOffset,
    pub metrics: ExportMetricsSnapshot,
}

enum BlockResult {
    Completed,
    Stop,
    Restart(String),
    Cancelled,
}

/// Drives the export of one source
pub struct ExportStreamWorker {
    descriptor: DataSourceDescriptor,
    source: SourceId,
    transport: Box<dyn ExportTransport>,
    decoder: Box<dyn RowDecoder>,
    settings: ExportSettings,
    acked: StreamOffset,
    high_water: StreamOffset,
    metrics: Arc<ExportMetrics>,
}

impl ExportStreamWorker {
    pub fn new(
        descriptor: DataSourceDescriptor,
        transport: Box<dyn ExportTransport>,
        decoder: Box<dyn RowDecoder>,
        settings: ExportSettings,
    ) -> Self {
        Self {
            source: descriptor.source_id(),
            descriptor,
            transport,
            decoder,
            settings,
            acked: StreamOffset::ZERO,
            high_water: StreamOffset::ZERO,
            metrics: Arc::new(ExportMetrics::default()),
        }
    }

    /// Share an existing metrics block (builder pattern)
    pub fn with_metrics(mut self, metrics: Arc<ExportMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<ExportMetrics> {
        self.metrics.clone()
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Run until the source is invalidated, the decoder stops, or a fatal
    /// error occurs. The decoder's `source_no_longer_advertised` is called
    /// exactly once on the way out, whatever the exit reason.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerReport {
        info!(
            source = %self.source,
            table = %self.descriptor.table_name,
            generation = self.descriptor.generation,
            "Export worker starting"
        );

        let exit = self.drive(&cancel).await;

        match &exit {
            WorkerExit::Stopped => {
                info!(source = %self.source, offset = %self.acked, "Decoder stopped export")
            }
            WorkerExit::Invalidated => {
                info!(source = %self.source, offset = %self.acked, "Source no longer advertised")
            }
            WorkerExit::Failed(e) => error!(
                source = %self.source,
                offset = %self.acked,
                error = %e,
                "Export worker failed"
            ),
        }
        self.decoder.source_no_longer_advertised(&self.descriptor).await;

        WorkerReport {
            source: self.source,
            exit,
            acknowledged: self.acked,
            high_water: self.high_water,
            metrics: self.metrics.snapshot(),
        }
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> WorkerExit {
        let mut restarts = RetryGuard::new(self.settings.restart.clone());

        loop {
            if cancel.is_cancelled() {
                return WorkerExit::Invalidated;
            }

            let response = match self.send(Request::Poll { source: self.source }, cancel).await {
                Some(Ok(response)) => response,
                Some(Err(e)) => return WorkerExit::Failed(e),
                None => return WorkerExit::Invalidated,
            };

            let (start_offset, payload) = match response {
                Response::PollResponse {
                    source,
                    start_offset,
                    payload,
                } => {
                    if source != self.source {
                        return self
                            .violation(format!("poll response for foreign source {}", source));
                    }
                    if start_offset != self.acked {
                        return self.violation(format!(
                            "block starts at {} but acknowledged offset is {}",
                            start_offset, self.acked
                        ));
                    }
                    (start_offset, payload)
                }
                Response::Error { kind, message, .. } => return self.on_error(kind, message),
                other => return self.violation(format!("unexpected reply to poll: {:?}", other)),
            };

            if payload.is_empty() {
                self.metrics.record_poll(true);
                trace!(source = %self.source, offset = %self.acked, "Idle poll");
                if !sleep_or_cancel(self.settings.idle_backoff, cancel).await {
                    return WorkerExit::Invalidated;
                }
                continue;
            }
            self.metrics.record_poll(false);

            let end_offset = match start_offset.end_of_block(payload.len()) {
                Ok(end) => end,
                Err(e) => return WorkerExit::Failed(e.into()),
            };
            if end_offset > self.high_water {
                self.high_water = end_offset;
            }

            let block = BlockInfo {
                source: self.source,
                start_offset,
                end_offset,
                redelivery: restarts.attempt(),
            };
            if block.is_redelivery() {
                debug!(
                    source = %self.source,
                    offset = %start_offset,
                    redelivery = block.redelivery,
                    "Block redelivered"
                );
            }

            match self.decode_block(&block, &payload, cancel).await {
                BlockResult::Completed => {}
                BlockResult::Stop => return WorkerExit::Stopped,
                BlockResult::Cancelled => return WorkerExit::Invalidated,
                BlockResult::Restart(reason) => {
                    self.metrics.record_restart();
                    match restarts.record_attempt() {
                        Some(delay) => {
                            warn!(
                                source = %self.source,
                                offset = %start_offset,
                                attempt = restarts.attempt(),
                                delay_ms = delay.as_millis() as u64,
                                reason = %reason,
                                "Restarting block"
                            );
                            if !sleep_or_cancel(delay, cancel).await {
                                return WorkerExit::Invalidated;
                            }
                            continue;
                        }
                        None => {
                            return WorkerExit::Failed(ConnectError::RestartsExhausted {
                                source_id: self.source,
                                offset: start_offset,
                                attempts: restarts.attempt(),
                                reason,
                            });
                        }
                    }
                }
            }

            // last safe point before the ack leaves
            if cancel.is_cancelled() {
                return WorkerExit::Invalidated;
            }
            let ack = Request::Ack {
                source: self.source,
                offset: end_offset,
            };
            match self.send(ack, cancel).await {
                Some(Ok(Response::AckResponse { source, offset }))
                    if source == self.source && offset == end_offset =>
                {
                    if let Err(e) = self.acked.advance_to(offset) {
                        return WorkerExit::Failed(e.into());
                    }
                    self.metrics.record_ack(block.len());
                    restarts.reset();
                    debug!(source = %self.source, offset = %offset, "Block acknowledged");
                }
                Some(Ok(Response::Error { kind, message, .. })) => {
                    return self.on_error(kind, message)
                }
                Some(Ok(other)) => {
                    return self.violation(format!("unexpected reply to ack: {:?}", other))
                }
                Some(Err(e)) => return WorkerExit::Failed(e),
                None => return WorkerExit::Invalidated,
            }
        }
    }

    async fn decode_block(
        &mut self,
        block: &BlockInfo,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> BlockResult {
        if let Err(e) = self.decoder.on_block_start(block).await {
            return BlockResult::Restart(format!("block start failed: {}", e));
        }

        for (index, row) in RowIter::new(payload).enumerate() {
            if cancel.is_cancelled() {
                return BlockResult::Cancelled;
            }
            let values = match row {
                Ok(values) => values,
                Err(e) => return BlockResult::Restart(format!("row {} undecodable: {}", index, e)),
            };
            self.metrics.record_row();

            match self.decoder.process_row(&ExportRow::new(index, values)).await {
                Ok(DecodeOutcome::Continue) => {}
                Ok(DecodeOutcome::Stop) => return BlockResult::Stop,
                Ok(DecodeOutcome::Restart(reason)) => return BlockResult::Restart(reason),
                Err(e) => return BlockResult::Restart(format!("row {} failed: {}", index, e)),
            }
        }

        match self.decoder.on_block_completion(block).await {
            Ok(DecodeOutcome::Continue) => BlockResult::Completed,
            Ok(DecodeOutcome::Stop) => BlockResult::Stop,
            Ok(DecodeOutcome::Restart(reason)) => BlockResult::Restart(reason),
            Err(e) => BlockResult::Restart(format!("block completion failed: {}", e)),
        }
    }

    /// `None` when cancelled before the response arrived
    async fn send(
        &mut self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Option<crate::error::Result<Response>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = self.transport.round_trip(request) => Some(response),
        }
    }

    fn on_error(&self, kind: ErrorKind, message: String) -> WorkerExit {
        match kind {
            ErrorKind::SourceInvalidated | ErrorKind::UnknownSource => {
                debug!(
                    source = %self.source,
                    kind = %kind,
                    message = %message,
                    "Producer withdrew source"
                );
                WorkerExit::Invalidated
            }
            ErrorKind::ProtocolViolation => self.violation(message),
        }
    }

    fn violation(&self, message: String) -> WorkerExit {
        error!(
            source = %self.source,
            offset = %self.acked,
            message = %message,
            "Protocol violation"
        );
        WorkerExit::Failed(ConnectError::protocol_violation(self.source, message))
    }
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

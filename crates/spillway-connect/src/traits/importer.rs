//! Importer trait and the context handed to its run body
//!
//! An importer pulls records from one external resource and feeds them to the
//! database. The runtime ([`ImportSupervisor`]) owns its lifecycle: it claims
//! the resource, builds the formatter, calls [`Importer::accept`] once and
//! releases the claim after `accept` has returned.
//!
//! # Stop contract
//!
//! `accept` must return promptly once stop is requested. Any wait it performs
//! for more external data must also complete on stop; racing the wait against
//! [`ImportContext::stopped`] in a `tokio::select!` is the usual way:
//!
//! ```rust,ignore
//! loop {
//!     tokio::select! {
//!         _ = ctx.stopped() => return Ok(()),
//!         record = source.next() => match record {
//!             Some(bytes) => { ctx.submit(&bytes).await?; }
//!             None => return Ok(()),
//!         },
//!     }
//! }
//! ```
//!
//! [`ImportSupervisor`]: crate::import::ImportSupervisor

use crate::error::{ConnectorError, ConnectorResult};
use crate::format::{FormatErrorPolicy, Formatter, FormatterBuilder};
use crate::import::{ResourceId, StopSignal};
use crate::metrics::ImportMetrics;
use crate::traits::retry::{retry_result, RetryConfig};
use crate::traits::writer::RowWriter;
use async_trait::async_trait;
use spillway_protocol::ColumnValue;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Pluggable ingress connector for one external resource
#[async_trait]
pub trait Importer: Send + Sync {
    /// Stable identifier of the resource. Must not depend on the importer
    /// running and must not have side effects.
    fn resource_id(&self) -> &ResourceId;

    /// Connector name for logs
    fn name(&self) -> &str;

    /// Formatter configuration for this resource's records
    fn formatter_builder(&self) -> &FormatterBuilder;

    /// Run body. Returns when the source is exhausted or stop was requested.
    async fn accept(&self, ctx: &ImportContext) -> ConnectorResult<()>;

    /// Extra stop hook, called after the stop signal is raised. Importers
    /// blocked in calls that cannot observe the signal (foreign client
    /// libraries) can interrupt them here. May be called before `accept`
    /// starts or after it returned.
    fn stop(&self) {}
}

/// What happened to a submitted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Written,
    /// Rejected by the formatter and skipped under [`FormatErrorPolicy::Skip`]
    Skipped,
}

/// Everything `accept` needs besides the importer itself
pub struct ImportContext {
    resource: ResourceId,
    importer_name: String,
    table: String,
    formatter: Box<dyn Formatter>,
    policy: FormatErrorPolicy,
    writer: Arc<dyn RowWriter>,
    write_retry: RetryConfig,
    stop: StopSignal,
    metrics: Arc<ImportMetrics>,
}

impl ImportContext {
    pub fn new(
        resource: ResourceId,
        table: impl Into<String>,
        formatter: Box<dyn Formatter>,
        writer: Arc<dyn RowWriter>,
    ) -> Self {
        Self {
            resource,
            importer_name: String::new(),
            table: table.into(),
            formatter,
            policy: FormatErrorPolicy::default(),
            writer,
            write_retry: RetryConfig::default(),
            stop: StopSignal::new(),
            metrics: Arc::new(ImportMetrics::default()),
        }
    }

    /// Set the importer name used in logs (builder pattern)
    pub fn with_importer_name(mut self, name: impl Into<String>) -> Self {
        self.importer_name = name.into();
        self
    }

    /// Set the format error policy (builder pattern)
    pub fn with_policy(mut self, policy: FormatErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the retry policy for transient write failures (builder pattern)
    pub fn with_write_retry(mut self, retry: RetryConfig) -> Self {
        self.write_retry = retry;
        self
    }

    /// Share an existing stop signal (builder pattern)
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Share an existing metrics block (builder pattern)
    pub fn with_metrics(mut self, metrics: Arc<ImportMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn metrics(&self) -> &ImportMetrics {
        &self.metrics
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_triggered()
    }

    /// Resolves once stop is requested
    pub async fn stopped(&self) {
        self.stop.stopped().await
    }

    /// Format one raw record and write the row.
    ///
    /// A format error is never dropped silently: under `Skip` it is logged
    /// with the resource and raw record and counted, under `Abort` it is
    /// returned as [`ConnectorError::Format`].
    pub async fn submit(&self, record: &[u8]) -> ConnectorResult<SubmitOutcome> {
        self.metrics.records_read.fetch_add(1, Ordering::Relaxed);

        let row = match self.formatter.transform(record) {
            Ok(row) => row,
            Err(e) => {
                self.metrics.format_errors.fetch_add(1, Ordering::Relaxed);
                let raw = String::from_utf8_lossy(record);
                return match self.policy {
                    FormatErrorPolicy::Skip => {
                        tracing::warn!(
                            resource = %self.resource,
                            importer = %self.importer_name,
                            record = %raw,
                            error = %e,
                            "Skipping malformed record"
                        );
                        self.metrics.records_skipped.fetch_add(1, Ordering::Relaxed);
                        Ok(SubmitOutcome::Skipped)
                    }
                    FormatErrorPolicy::Abort => {
                        tracing::error!(
                            resource = %self.resource,
                            importer = %self.importer_name,
                            record = %raw,
                            error = %e,
                            "Malformed record, aborting importer"
                        );
                        Err(ConnectorError::Format {
                            resource: self.resource.to_string(),
                            record: raw.into_owned(),
                            reason: e.to_string(),
                        })
                    }
                };
            }
        };

        self.write_row(row).await?;
        Ok(SubmitOutcome::Written)
    }

    /// Write an already-typed row, retrying transient failures
    pub async fn write_row(&self, row: Vec<ColumnValue>) -> ConnectorResult<()> {
        retry_result(&self.write_retry, || {
            self.writer.write_row(&self.table, row.clone())
        })
        .await?;
        self.metrics.rows_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for ImportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportContext")
            .field("resource", &self.resource)
            .field("table", &self.table)
            .field("formatter", &self.formatter.name())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Build a context for running `importer` against `writer`, with the
/// importer's own formatter
pub fn context_for(
    importer: &dyn Importer,
    table: impl Into<String>,
    writer: Arc<dyn RowWriter>,
) -> ConnectorResult<ImportContext> {
    let formatter = importer.formatter_builder().build()?;
    Ok(
        ImportContext::new(importer.resource_id().clone(), table, formatter, writer)
            .with_importer_name(importer.name()),
    )
}

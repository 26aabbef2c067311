//! spillway-connect - Export stream workers and importer runtime for spillway
//!
//! This crate provides both the SDK (traits for decoders and importers) and
//! the runtime (export workers, import supervision) that move data between
//! the database and external systems.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 spillway-connect (SDK + Runtime)                │
//! │  RowDecoder, Importer, Formatter, RowWriter, Registries         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Export                          │  Import                      │
//! │  ├── StreamBuffer (producer)     │  ├── ResourceRegistry        │
//! │  ├── ExportTransport             │  ├── ImportSupervisor        │
//! │  ├── ExportStreamWorker          │  ├── ImporterLifecycle       │
//! │  └── ExportManager               │  └── CommitTracker           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Built-in: csv-file (decoder), file / channel (importers)       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # SDK Usage
//!
//! ```rust,ignore
//! use spillway_connect::prelude::*;
//!
//! struct Counter(u64);
//!
//! #[async_trait]
//! impl RowDecoder for Counter {
//!     async fn process_row(&mut self, _row: &ExportRow) -> ConnectorResult<DecodeOutcome> {
//!         self.0 += 1;
//!         Ok(DecodeOutcome::Continue)
//!     }
//!
//!     async fn source_no_longer_advertised(&mut self, d: &DataSourceDescriptor) {
//!         tracing::info!(table = %d.table_name, rows = self.0, "done");
//!     }
//! }
//! ```
//!
//! # Runtime Usage
//!
//! ```rust,ignore
//! let config = ConnectConfig::from_file(&"connect.yaml".into())?;
//! spillway_connect::logging::init_logging(&config.settings.log_level);
//!
//! let supervisor = ImportSupervisor::new(config.worker_id(), registry, writer);
//! for (importer, options) in config.build_importers(&ImporterRegistry::with_builtins())? {
//!     supervisor.schedule(importer, options)?;
//! }
//! ```

// Core SDK traits
pub mod traits;

// Error types
pub mod error;

// Runtime modules
pub mod config;
pub mod connectors;
pub mod export;
pub mod format;
pub mod import;
pub mod logging;
pub mod metrics;

// Testing utilities
pub use traits::testing;

// Re-export traits and registries
pub use traits::{
    context_for, retry_result, BlockInfo, DecodeOutcome, DecoderFactory, DecoderRegistry,
    ExportRow, ImportContext, Importer, ImporterFactory, ImporterRegistry, RetryConfig, RetryGuard,
    RowDecoder, RowWriter, SubmitOutcome,
};

// Re-export runtime types
pub use export::{
    ChannelTransport, ExportManager, ExportProducer, ExportRoute, ExportSettings,
    ExportStreamWorker, ExportTransport, LocalTransport, StreamBuffer, TransportFactory,
    WorkerExit, WorkerReport,
};
pub use format::{FormatError, FormatErrorPolicy, Formatter, FormatterBuilder};
pub use import::{
    CommitTracker, ImportOptions, ImportSupervisor, ImporterHandle, ImporterLifecycle,
    ImporterPhase, ResourceClaim, ResourceDescriptor, ResourceId, ResourceRegistry, StopSignal,
    WorkerId,
};
pub use metrics::{ExportMetrics, ExportMetricsSnapshot, ImportMetrics, ImportMetricsSnapshot};

// Re-export error types
pub use error::{ConnectError, ConnectorError, ConnectorResult, ConnectorStatus, Result};

// Re-export config
pub use config::ConnectConfig;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        // Re-exports
        async_trait,
        // Export
        BlockInfo,
        CancellationToken,
        // Errors
        ConnectError,
        ConnectorError,
        ConnectorResult,
        DecodeOutcome,
        DecoderFactory,
        ExportRow,
        // Format
        FormatErrorPolicy,
        Formatter,
        FormatterBuilder,
        // Import
        ImportContext,
        Importer,
        ImporterFactory,
        ResourceId,
        Result,
        // Retry
        RetryConfig,
        RowDecoder,
        RowWriter,
        SubmitOutcome,
    };

    pub use spillway_protocol::{
    ColumnType, ColumnValue, DataSourceDescriptor, SourceId, StreamOffset,
};

    // Re-export validation and schema traits
    pub use schemars::JsonSchema;
    pub use validator::Validate;
}

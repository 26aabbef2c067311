//! Core connector traits and types
//!
//! This module provides the plugin contracts of spillway-connect:
//! - `RowDecoder` - Consume the rows of one export stream
//! - `Importer` - Feed records from one external resource into a table
//! - `RowWriter` - The database write path importers use
//! - `registry` - Name-based lookup of decoder and importer factories
//! - `retry` - Retry utilities and restart budgets
//! - `testing` - Mock decoders, importers and transports for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use spillway_connect::prelude::*;
//!
//! pub struct AuditDecoder { rows: Vec<Vec<ColumnValue>> }
//!
//! #[async_trait]
//! impl RowDecoder for AuditDecoder {
//!     async fn process_row(&mut self, row: &ExportRow) -> ConnectorResult<DecodeOutcome> {
//!         self.rows.push(row.values.clone());
//!         Ok(DecodeOutcome::Continue)
//!     }
//!
//!     async fn source_no_longer_advertised(&mut self, _: &DataSourceDescriptor) {
//!         self.rows.clear();
//!     }
//! }
//! ```

pub mod decoder;
pub mod importer;
pub mod registry;
pub mod retry;
pub mod testing;
pub mod writer;

pub use decoder::{BlockInfo, DecodeOutcome, ExportRow, RowDecoder};

pub use importer::{context_for, ImportContext, Importer, SubmitOutcome};

pub use registry::{DecoderFactory, DecoderRegistry, ImporterFactory, ImporterRegistry};

pub use retry::{retry_result, RetryConfig, RetryGuard};

pub use writer::RowWriter;

// Re-export testing utilities
pub use testing::{
    DecoderProbe, MemoryRowWriter, MockDecoder, MockImporter, RecordingTransport, RequestLog,
};

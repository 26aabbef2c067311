//! Export side: producer, transport, stream workers
//!
//! ```text
//! ┌──────────────┐ Poll/Ack  ┌────────────────────┐  rows  ┌────────────┐
//! │ StreamBuffer │◀─────────▶│ ExportStreamWorker │───────▶│ RowDecoder │
//! │  (producer)  │ transport └────────────────────┘        └────────────┘
//! └──────────────┘                  ▲ one per source
//!                                   │
//!                            ExportManager
//! ```

pub mod manager;
pub mod producer;
pub mod transport;
pub mod worker;

pub use manager::{ExportManager, ExportRoute, TransportFactory};
pub use producer::{ExportProducer, StreamBuffer};
pub use transport::{serve_producer, ChannelTransport, Envelope, ExportTransport, LocalTransport};
pub use worker::{ExportSettings, ExportStreamWorker, WorkerExit, WorkerReport};

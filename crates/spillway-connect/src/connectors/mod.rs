//! Built-in connectors
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Export decoders                                         │
//! │  └── csv-file   one delimited file per table generation  │
//! │  Importers                                               │
//! │  ├── file       lines of a local file                    │
//! │  └── channel    records pushed by application code       │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod csv_file;
pub mod file;

pub use channel::ChannelImporter;
pub use csv_file::{CsvFileDecoder, CsvFileDecoderConfig, CsvFileDecoderFactory};
pub use file::{FileImporter, FileImporterFactory};

//! Connector registry for name-based lookup
//!
//! Configuration refers to decoders and importers by name (`csv-file`,
//! `file`, ...). The registries map those names to factories.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  spillway-connect (SDK + Runtime)            │
//! │   DecoderFactory, ImporterFactory, DecoderRegistry, ...      │
//! ├──────────────────────────────────────────────────────────────┤
//! │   Built-in: csv-file (decoder), file (importer)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use spillway_connect::{DecoderRegistry, ImporterRegistry};
//! use std::sync::Arc;
//!
//! let mut decoders = DecoderRegistry::new();
//! decoders.register("my-decoder", Arc::new(MyDecoderFactory));
//!
//! let importers = ImporterRegistry::with_builtins();
//! ```

use super::decoder::RowDecoder;
use super::importer::Importer;
use crate::connectors::csv_file::CsvFileDecoderFactory;
use crate::connectors::file::FileImporterFactory;
use crate::error::ConnectorResult;
use crate::format::FormatterBuilder;
use spillway_protocol::DataSourceDescriptor;
use std::collections::HashMap;
use std::sync::Arc;

/// Creates one decoder per advertised source
pub trait DecoderFactory: Send + Sync {
    /// Name used in configuration
    fn name(&self) -> &'static str;

    /// Check a raw configuration without creating anything
    fn validate(&self, config: &serde_yaml::Value) -> ConnectorResult<()>;

    /// Create the decoder for one source
    fn create(
        &self,
        descriptor: &DataSourceDescriptor,
        config: &serde_yaml::Value,
    ) -> ConnectorResult<Box<dyn RowDecoder>>;
}

/// Creates importers from configuration properties.
///
/// Missing or malformed properties must be reported here, before the
/// importer is scheduled.
pub trait ImporterFactory: Send + Sync {
    /// Name used in configuration
    fn name(&self) -> &'static str;

    fn create(
        &self,
        properties: &HashMap<String, String>,
        formatter: FormatterBuilder,
    ) -> ConnectorResult<Arc<dyn Importer>>;
}

/// Registry of available decoders
#[derive(Default)]
pub struct DecoderRegistry {
    factories: HashMap<String, Arc<dyn DecoderFactory>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every decoder shipped in this crate
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("csv-file", Arc::new(CsvFileDecoderFactory));
        registry
    }

    /// Register a decoder factory
    pub fn register(&mut self, name: &str, factory: Arc<dyn DecoderFactory>) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DecoderFactory>> {
        self.factories.get(name)
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Registry of available importers
#[derive(Default)]
pub struct ImporterRegistry {
    factories: HashMap<String, Arc<dyn ImporterFactory>>,
}

impl ImporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every importer shipped in this crate
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("file", Arc::new(FileImporterFactory));
        registry
    }

    /// Register an importer factory
    pub fn register(&mut self, name: &str, factory: Arc<dyn ImporterFactory>) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ImporterFactory>> {
        self.factories.get(name)
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

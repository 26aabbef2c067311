//! Configuration types for spillway-connect
//!
//! Architecture:
//!   Advertised sources → exporters (decoder per table) → external files/systems
//!   External resources → importers (formatter per resource) → tables

use crate::error::ConnectorResult;
use crate::export::{ExportRoute, ExportSettings};
use crate::format::{FormatErrorPolicy, FormatterBuilder};
use crate::import::{ImportOptions, WorkerId};
use crate::traits::importer::Importer;
use crate::traits::registry::{DecoderRegistry, ImporterRegistry};
use crate::traits::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectConfig {
    /// Configuration version
    #[serde(default = "default_version")]
    pub version: String,

    /// Identity of this worker in the resource registry (generated at load if absent)
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Export worker tuning
    #[serde(default)]
    pub export: ExportConfig,

    /// Exporters (decoder per table)
    #[serde(default)]
    pub exporters: HashMap<String, ExporterConfig>,

    /// Importers (external resource into a table)
    #[serde(default)]
    pub importers: HashMap<String, ImporterConfig>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

/// Export worker tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    /// Pause after an empty poll (milliseconds)
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Restart budget per block
    #[serde(default)]
    pub restart: RestartConfig,
}

fn default_idle_backoff_ms() -> u64 {
    100
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: default_idle_backoff_ms(),
            restart: RestartConfig::default(),
        }
    }
}

impl ExportConfig {
    pub fn settings(&self) -> ExportSettings {
        ExportSettings {
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
            restart: RetryConfig::from(&self.restart),
        }
    }
}

/// Consecutive restarts allowed for one block, with exponential backoff
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestartConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl From<&RestartConfig> for RetryConfig {
    fn from(config: &RestartConfig) -> Self {
        RetryConfig::new()
            .with_max_retries(config.max_retries)
            .with_initial_delay(Duration::from_millis(config.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(config.max_backoff_ms))
            .with_backoff_multiplier(config.backoff_multiplier)
    }
}

/// One exporter: a decoder applied to a set of tables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExporterConfig {
    /// Decoder type (e.g., "csv-file")
    pub decoder: String,

    /// Table names routed to this exporter; `*` matches all
    #[serde(default)]
    pub tables: Vec<String>,

    /// Whether this exporter is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Decoder-specific configuration
    #[serde(default)]
    pub config: serde_yaml::Value,
}

/// One importer: an external resource loaded into a table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImporterConfig {
    /// Connector type (e.g., "file")
    pub connector: String,

    /// Whether this importer is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Destination table (falls back to the `table` property, then the importer name)
    #[serde(default)]
    pub table: Option<String>,

    /// Record format
    #[serde(default)]
    pub format: FormatterBuilder,

    /// What to do with records the formatter rejects
    #[serde(default)]
    pub on_format_error: FormatErrorPolicy,

    /// Connector-specific properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ImporterConfig {
    /// Destination table for the importer registered under `name`
    pub fn table_for(&self, name: &str) -> String {
        self.table
            .clone()
            .or_else(|| self.properties.get("table").cloned())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn options(&self, name: &str) -> ImportOptions {
        ImportOptions::new(self.table_for(name)).with_policy(self.on_format_error)
    }
}

/// Global settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalSettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl ConnectConfig {
    /// Load configuration from file
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::from_yaml(&content)
    }

    /// Parse, expand and validate a YAML document
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables
        let expanded = Self::expand_env_vars(content);

        let mut config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        // pin a generated identity so every caller sees the same worker
        if config.worker_id.is_none() {
            config.worker_id = Some(WorkerId::generate().as_str().to_string());
        }
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration against the built-in connectors
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_with(&DecoderRegistry::with_builtins(), &ImporterRegistry::with_builtins())
    }

    /// Validate configuration against the given registries
    pub fn validate_with(
        &self,
        decoders: &DecoderRegistry,
        importers: &ImporterRegistry,
    ) -> anyhow::Result<()> {
        let restart = &self.export.restart;
        if restart.backoff_multiplier < 1.0 {
            anyhow::bail!("export.restart.backoff_multiplier must be at least 1.0");
        }
        if restart.max_backoff_ms < restart.initial_backoff_ms {
            anyhow::bail!("export.restart.max_backoff_ms must not be below initial_backoff_ms");
        }

        for (name, exporter) in self.enabled_exporters() {
            if exporter.tables.is_empty() {
                anyhow::bail!("Exporter '{}' must list at least one table", name);
            }
            let Some(factory) = decoders.get(&exporter.decoder) else {
                anyhow::bail!("Exporter '{}': unknown decoder '{}'", name, exporter.decoder);
            };
            factory
                .validate(&exporter.config)
                .map_err(|e| anyhow::anyhow!("Exporter '{}': {}", name, e))?;
        }

        for (name, importer) in self.enabled_importers() {
            let Some(factory) = importers.get(&importer.connector) else {
                anyhow::bail!("Importer '{}': unknown connector '{}'", name, importer.connector);
            };
            importer
                .format
                .build()
                .map_err(|e| anyhow::anyhow!("Importer '{}': {}", name, e))?;
            factory
                .create(&importer.properties, importer.format.clone())
                .map_err(|e| anyhow::anyhow!("Importer '{}': {}", name, e))?;
        }

        Ok(())
    }

    /// Get enabled exporters, sorted by name
    pub fn enabled_exporters(&self) -> Vec<(&String, &ExporterConfig)> {
        let mut enabled: Vec<_> = self.exporters.iter().filter(|(_, e)| e.enabled).collect();
        enabled.sort_by(|a, b| a.0.cmp(b.0));
        enabled
    }

    /// Get enabled importers, sorted by name
    pub fn enabled_importers(&self) -> Vec<(&String, &ImporterConfig)> {
        let mut enabled: Vec<_> = self.importers.iter().filter(|(_, i)| i.enabled).collect();
        enabled.sort_by(|a, b| a.0.cmp(b.0));
        enabled
    }

    /// Worker identity. Loading fills in a generated id when none is
    /// configured; a config assembled by hand without one gets a fresh id on
    /// every call.
    pub fn worker_id(&self) -> WorkerId {
        match &self.worker_id {
            Some(id) => WorkerId::new(id.clone()),
            None => WorkerId::generate(),
        }
    }

    /// Export routes for every enabled exporter
    pub fn export_routes(&self, decoders: &DecoderRegistry) -> ConnectorResult<Vec<ExportRoute>> {
        self.enabled_exporters()
            .into_iter()
            .map(|(name, exporter)| {
                let factory = decoders.get(&exporter.decoder).cloned().ok_or_else(|| {
                    crate::error::ConnectorError::config(format!(
                        "exporter '{}': unknown decoder '{}'",
                        name, exporter.decoder
                    ))
                })?;
                Ok(ExportRoute {
                    name: name.clone(),
                    tables: exporter.tables.clone(),
                    factory,
                    config: exporter.config.clone(),
                })
            })
            .collect()
    }

    /// Instantiate every enabled importer with its scheduling options
    pub fn build_importers(
        &self,
        registry: &ImporterRegistry,
    ) -> ConnectorResult<Vec<(Arc<dyn Importer>, ImportOptions)>> {
        self.enabled_importers()
            .into_iter()
            .map(|(name, config)| {
                let factory = registry.get(&config.connector).ok_or_else(|| {
                    crate::error::ConnectorError::config(format!(
                        "importer '{}': unknown connector '{}'",
                        name, config.connector
                    ))
                })?;
                let importer = factory.create(&config.properties, config.format.clone())?;
                Ok((importer, config.options(name)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("SPILLWAY_TEST_DIR", "/var/export");
        let content = "output_dir: ${SPILLWAY_TEST_DIR}";
        let expanded = ConnectConfig::expand_env_vars(content);
        assert_eq!(expanded, "output_dir: /var/export");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("SPILLWAY_MISSING_VAR");
        let content = "value: ${SPILLWAY_MISSING_VAR:-default_value}";
        let expanded = ConnectConfig::expand_env_vars(content);
        assert_eq!(expanded, "value: default_value");
    }

    #[test]
    fn test_parse_config() {
        let yaml = r#"
version: "1.0"
worker_id: node-1
export:
  idle_backoff_ms: 25
  restart:
    max_retries: 3
exporters:
  archive:
    decoder: csv-file
    tables: [orders, "*"]
    config:
      output_dir: /tmp/spillway
importers:
  people:
    connector: file
    format:
      type: csv
      column_types: [INTEGER, STRING]
    on_format_error: abort
    properties:
      path: /data/people.csv
      skip_header: "true"
"#;
        let config = ConnectConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.worker_id().as_str(), "node-1");
        assert_eq!(config.export.settings().idle_backoff, Duration::from_millis(25));
        assert_eq!(config.export.settings().restart.max_retries, 3);
        assert_eq!(config.export.restart.backoff_multiplier, 2.0);

        let importer = &config.importers["people"];
        assert_eq!(importer.table_for("people"), "people");
        assert_eq!(importer.on_format_error, FormatErrorPolicy::Abort);

        let routes = config.export_routes(&DecoderRegistry::with_builtins()).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].name, "archive");

        let importers = config.build_importers(&ImporterRegistry::with_builtins()).unwrap();
        assert_eq!(importers.len(), 1);
        assert_eq!(importers[0].0.resource_id().as_str(), "file:///data/people.csv");
        assert_eq!(importers[0].1.on_format_error, FormatErrorPolicy::Abort);
    }

    #[test]
    fn test_generated_worker_id_is_stable() {
        let config = ConnectConfig::from_yaml("version: \"1.0\"\n").unwrap();
        let first = config.worker_id();
        assert_eq!(config.worker_id(), first);
        assert_eq!(config.clone().worker_id(), first);
        assert_eq!(config.worker_id.as_deref(), Some(first.as_str()));
    }

    #[test]
    fn test_missing_path_fails_fast() {
        let yaml = r#"
importers:
  people:
    connector: file
    properties:
      skip_header: "true"
"#;
        let err = ConnectConfig::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("people"), "{}", err);
        assert!(err.contains("'path'"), "{}", err);
    }

    #[test]
    fn test_unknown_decoder_rejected() {
        let yaml = r#"
exporters:
  x:
    decoder: carrier-pigeon
    tables: [t]
"#;
        let err = ConnectConfig::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("carrier-pigeon"));
    }

    #[test]
    fn test_disabled_entries_skipped() {
        let yaml = r#"
exporters:
  off:
    decoder: nope
    enabled: false
importers:
  off:
    connector: file
    enabled: false
"#;
        let config = ConnectConfig::from_yaml(yaml).unwrap();
        assert!(config.enabled_exporters().is_empty());
        assert!(config.enabled_importers().is_empty());
    }

    #[test]
    fn test_table_fallbacks() {
        let mut importer = ImporterConfig {
            connector: "file".into(),
            enabled: true,
            table: None,
            format: FormatterBuilder::default(),
            on_format_error: FormatErrorPolicy::Skip,
            properties: HashMap::new(),
        };
        assert_eq!(importer.table_for("people"), "people");
        importer.properties.insert("table".into(), "staff".into());
        assert_eq!(importer.table_for("people"), "staff");
        importer.table = Some("crew".into());
        assert_eq!(importer.table_for("people"), "crew");
    }

    #[test]
    fn test_bad_restart_settings() {
        let yaml = r#"
export:
  restart:
    backoff_multiplier: 0.5
"#;
        assert!(ConnectConfig::from_yaml(yaml).is_err());
    }
}

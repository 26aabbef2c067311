//! CSV file exporter
//!
//! Writes every exported row of a source to `<output_dir>/<table>-<generation>.csv`
//! (`.tsv` for tab-delimited output). Rows of a block are buffered and appended
//! when the block completes, so a restarted block never leaves half of its rows
//! in the file. A `<table>-<generation>-schema.json` sidecar describing the
//! written columns is created next to the data file on the first block.
//!
//! Delivery is at least once: if appending fails midway the block is
//! restarted and its rows may appear twice.

use crate::error::{ConnectorError, ConnectorResult};
use crate::format::{escape_field, CsvDelimiter};
use crate::traits::decoder::{BlockInfo, DecodeOutcome, ExportRow, RowDecoder};
use crate::traits::registry::DecoderFactory;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use spillway_protocol::{ColumnValue, DataSourceDescriptor};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use validator::Validate;

/// Column name prefix of engine-maintained metadata columns
pub const INTERNAL_COLUMN_PREFIX: &str = "__";

/// CSV file decoder configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct CsvFileDecoderConfig {
    /// Directory receiving the data and schema files
    #[validate(length(min = 1))]
    pub output_dir: String,

    /// Field delimiter
    #[serde(default)]
    pub delimiter: CsvDelimiter,

    /// Text written for SQL NULL
    #[serde(default)]
    pub null_value: String,

    /// Leave out columns whose name starts with `__`
    #[serde(default)]
    pub skip_internal_columns: bool,
}

impl CsvFileDecoderConfig {
    /// Parse a raw configuration block, naming missing properties
    pub fn from_value(value: &serde_yaml::Value) -> ConnectorResult<Self> {
        if value.get("output_dir").is_none() {
            return Err(ConnectorError::missing_property("output_dir"));
        }
        let config: Self = serde_yaml::from_value(value.clone())?;
        config
            .validate()
            .map_err(|e| ConnectorError::config(format!("csv-file: {}", e)))?;
        Ok(config)
    }
}

/// Exports one source to a delimited text file
pub struct CsvFileDecoder {
    descriptor: DataSourceDescriptor,
    config: CsvFileDecoderConfig,
    data_path: PathBuf,
    schema_path: PathBuf,
    /// Indices of the columns that are written
    columns: Vec<usize>,
    /// Formatted lines of the block being decoded
    pending: Vec<String>,
    file: Option<File>,
    rows_written: u64,
}

impl CsvFileDecoder {
    /// Create the decoder. No file is touched until the first block completes.
    pub fn new(descriptor: DataSourceDescriptor, config: CsvFileDecoderConfig) -> Self {
        let dir = Path::new(&config.output_dir);
        let stem = format!("{}-{}", descriptor.table_name, descriptor.generation);
        let data_path = dir.join(format!("{}.{}", stem, config.delimiter.extension()));
        let schema_path = dir.join(format!("{}-schema.json", stem));

        let columns = descriptor
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                !(config.skip_internal_columns && c.name.starts_with(INTERNAL_COLUMN_PREFIX))
            })
            .map(|(i, _)| i)
            .collect();

        Self {
            descriptor,
            config,
            data_path,
            schema_path,
            columns,
            pending: Vec::new(),
            file: None,
            rows_written: 0,
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_path
    }

    fn format_value(&self, value: &ColumnValue) -> String {
        let text = match value {
            ColumnValue::Null => self.config.null_value.clone(),
            other => other.to_string(),
        };
        escape_field(&text, self.config.delimiter.as_char(), '"')
    }

    fn format_row(&self, row: &ExportRow) -> ConnectorResult<String> {
        if !self.descriptor.columns.is_empty()
            && row.values.len() != self.descriptor.columns.len()
        {
            return Err(ConnectorError::Schema(format!(
                "row {} has {} values, table {} has {} columns",
                row.index,
                row.values.len(),
                self.descriptor.table_name,
                self.descriptor.columns.len()
            )));
        }

        let delimiter = self.config.delimiter.as_char().to_string();
        let fields: Vec<String> = if self.descriptor.columns.is_empty() {
            row.values.iter().map(|v| self.format_value(v)).collect()
        } else {
            self.columns
                .iter()
                .map(|&i| self.format_value(&row.values[i]))
                .collect()
        };
        Ok(fields.join(&delimiter))
    }

    fn schema_json(&self) -> serde_json::Value {
        let columns: Vec<serde_json::Value> = self
            .columns
            .iter()
            .map(|&i| {
                let column = &self.descriptor.columns[i];
                serde_json::json!({
                    "name": column.name,
                    "type": column.column_type.to_string(),
                    "nullable": column.nullable,
                })
            })
            .collect();
        serde_json::json!({
            "table": self.descriptor.table_name,
            "partition_id": self.descriptor.partition_id,
            "table_id": self.descriptor.table_id,
            "generation": self.descriptor.generation,
            "delimiter": self.config.delimiter.as_char().to_string(),
            "columns": columns,
        })
    }

    async fn open(&mut self) -> ConnectorResult<&mut File> {
        if self.file.is_none() {
            tokio::fs::create_dir_all(&self.config.output_dir).await?;
            let schema = serde_json::to_vec_pretty(&self.schema_json())?;
            tokio::fs::write(&self.schema_path, schema).await?;

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.data_path)
                .await?;
            info!(
                table = %self.descriptor.table_name,
                path = %self.data_path.display(),
                "Opened export file"
            );
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| ConnectorError::Internal("export file not open".into()))
    }
}

#[async_trait]
impl RowDecoder for CsvFileDecoder {
    async fn on_block_start(&mut self, _block: &BlockInfo) -> ConnectorResult<()> {
        self.pending.clear();
        Ok(())
    }

    async fn process_row(&mut self, row: &ExportRow) -> ConnectorResult<DecodeOutcome> {
        let line = self.format_row(row)?;
        self.pending.push(line);
        Ok(DecodeOutcome::Continue)
    }

    async fn on_block_completion(&mut self, block: &BlockInfo) -> ConnectorResult<DecodeOutcome> {
        if self.pending.is_empty() {
            return Ok(DecodeOutcome::Continue);
        }

        let mut chunk = String::new();
        for line in &self.pending {
            chunk.push_str(line);
            chunk.push('\n');
        }
        let file = self.open().await?;
        file.write_all(chunk.as_bytes()).await?;
        file.flush().await?;

        self.rows_written += self.pending.len() as u64;
        debug!(
            source = %block.source,
            offset = %block.end_offset,
            rows = self.pending.len(),
            "Appended block to export file"
        );
        self.pending.clear();
        Ok(DecodeOutcome::Continue)
    }

    async fn source_no_longer_advertised(&mut self, descriptor: &DataSourceDescriptor) {
        self.pending.clear();
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.sync_all().await {
                warn!(table = %descriptor.table_name, error = %e, "Failed to sync export file");
            }
        }
        info!(
            table = %descriptor.table_name,
            rows = self.rows_written,
            "Closed export file"
        );
    }
}

/// Factory for [`CsvFileDecoder`]
pub struct CsvFileDecoderFactory;

impl DecoderFactory for CsvFileDecoderFactory {
    fn name(&self) -> &'static str {
        "csv-file"
    }

    fn validate(&self, config: &serde_yaml::Value) -> ConnectorResult<()> {
        CsvFileDecoderConfig::from_value(config).map(|_| ())
    }

    fn create(
        &self,
        descriptor: &DataSourceDescriptor,
        config: &serde_yaml::Value,
    ) -> ConnectorResult<Box<dyn RowDecoder>> {
        let config = CsvFileDecoderConfig::from_value(config)?;
        Ok(Box::new(CsvFileDecoder::new(descriptor.clone(), config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_protocol::{ColumnType, SourceId, StreamOffset};

    fn descriptor() -> DataSourceDescriptor {
        DataSourceDescriptor::new(0, 4, "orders")
            .with_column("__txn_id", ColumnType::BigInt)
            .with_column("id", ColumnType::BigInt)
            .with_column("note", ColumnType::String)
            .with_generation(7)
    }

    fn block() -> BlockInfo {
        BlockInfo {
            source: SourceId::new(0, 4),
            start_offset: StreamOffset::ZERO,
            end_offset: StreamOffset::new(10),
            redelivery: 0,
        }
    }

    fn row(index: usize, id: i64, note: Option<&str>) -> ExportRow {
        ExportRow::new(
            index,
            vec![
                ColumnValue::Integer(100 + id),
                ColumnValue::Integer(id),
                note.map(ColumnValue::from).unwrap_or(ColumnValue::Null),
            ],
        )
    }

    fn config(dir: &Path, skip_internal: bool) -> CsvFileDecoderConfig {
        CsvFileDecoderConfig {
            output_dir: dir.to_string_lossy().into_owned(),
            delimiter: CsvDelimiter::Comma,
            null_value: "\\N".into(),
            skip_internal_columns: skip_internal,
        }
    }

    #[test]
    fn test_config_requires_output_dir() {
        let value: serde_yaml::Value = serde_yaml::from_str("delimiter: tab").unwrap();
        let err = CsvFileDecoderConfig::from_value(&value).unwrap_err();
        assert!(err.to_string().contains("output_dir"));

        let value: serde_yaml::Value = serde_yaml::from_str("output_dir: ''").unwrap();
        assert!(CsvFileDecoderConfig::from_value(&value).unwrap_err().is_config());

        let value: serde_yaml::Value =
            serde_yaml::from_str("output_dir: /tmp\nskip_internal_columns: often").unwrap();
        assert!(matches!(
            CsvFileDecoderConfig::from_value(&value),
            Err(ConnectorError::Yaml(_))
        ));
    }

    #[tokio::test]
    async fn test_block_written_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut decoder = CsvFileDecoder::new(descriptor(), config(dir.path(), true));
        assert_eq!(decoder.data_path(), dir.path().join("orders-7.csv"));

        decoder.on_block_start(&block()).await.unwrap();
        decoder.process_row(&row(0, 1, Some("a,b"))).await.unwrap();
        decoder.process_row(&row(1, 2, None)).await.unwrap();
        assert!(!decoder.data_path().exists());

        decoder.on_block_completion(&block()).await.unwrap();
        decoder.source_no_longer_advertised(&descriptor()).await;

        let data = std::fs::read_to_string(dir.path().join("orders-7.csv")).unwrap();
        assert_eq!(data, "1,\"a,b\"\n2,\\N\n");

        let raw = std::fs::read(dir.path().join("orders-7-schema.json")).unwrap();
        let schema: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(schema["generation"], 7);
        assert_eq!(schema["columns"].as_array().unwrap().len(), 2);
        assert_eq!(schema["columns"][0]["name"], "id");
    }

    #[tokio::test]
    async fn test_restarted_block_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut decoder = CsvFileDecoder::new(descriptor(), config(dir.path(), false));

        // first delivery abandoned after one row
        decoder.on_block_start(&block()).await.unwrap();
        decoder.process_row(&row(0, 1, Some("x"))).await.unwrap();

        let mut redelivery = block();
        redelivery.redelivery = 1;
        decoder.on_block_start(&redelivery).await.unwrap();
        decoder.process_row(&row(0, 1, Some("x"))).await.unwrap();
        decoder.process_row(&row(1, 2, Some("y"))).await.unwrap();
        decoder.on_block_completion(&redelivery).await.unwrap();

        let data = std::fs::read_to_string(decoder.data_path()).unwrap();
        assert_eq!(data, "101,1,x\n102,2,y\n");
    }

    #[tokio::test]
    async fn test_width_mismatch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut decoder = CsvFileDecoder::new(descriptor(), config(dir.path(), false));
        let short = ExportRow::new(0, vec![ColumnValue::Integer(1)]);
        assert!(matches!(
            decoder.process_row(&short).await,
            Err(ConnectorError::Schema(_))
        ));
    }

    #[test]
    fn test_factory_validates() {
        let factory = CsvFileDecoderFactory;
        assert_eq!(factory.name(), "csv-file");
        let good: serde_yaml::Value =
            serde_yaml::from_str("output_dir: /tmp/out\ndelimiter: pipe").unwrap();
        assert!(factory.validate(&good).is_ok());
        assert!(factory.create(&descriptor(), &good).is_ok());
        assert!(factory.validate(&serde_yaml::Value::Null).is_err());
    }
}

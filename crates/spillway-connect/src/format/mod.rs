//! Record formatters for importers
//!
//! A [`Formatter`] turns one raw external record into one row of typed column
//! values. Formatters are built from a [`FormatterBuilder`], which is plain
//! configuration: building validates it and fails fast, so a malformed
//! configuration never reaches a running importer.
//!
//! | Builder | Formatter | Input |
//! |---------|-----------|-------|
//! | `csv`   | [`CsvFormatter`] | one delimited line, RFC 4180 quoting |
//! | `tsv`   | [`CsvFormatter`] | same, tab delimited |
//! | `json`  | [`JsonFormatter`] | one JSON object, fields picked by name |
//!
//! # Example
//!
//! ```rust,ignore
//! use spillway_connect::format::{FormatterBuilder, CsvFormatConfig};
//!
//! let formatter = FormatterBuilder::Csv(CsvFormatConfig::default()).build()?;
//! let row = formatter.transform(b"1,\"hello, world\"")?;
//! ```

pub mod csv;
pub mod json;

pub use csv::{escape_field, CsvDelimiter, CsvFormatConfig, CsvFormatter};
pub use json::{JsonFormatConfig, JsonFormatter};

use crate::error::ConnectorResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use spillway_protocol::ColumnValue;
use thiserror::Error;

/// Why a record could not be turned into a row
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("record is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("column {column}: {reason}")]
    Value { column: usize, reason: String },

    #[error("unterminated quoted field")]
    UnterminatedQuote,

    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Pure transformation from one external record to one row
pub trait Formatter: Send + Sync {
    /// Formatter name for logs
    fn name(&self) -> &'static str;

    /// Transform a single record. Never drops or truncates values: anything
    /// that does not fit is an error.
    fn transform(&self, record: &[u8]) -> Result<Vec<ColumnValue>, FormatError>;
}

/// What an importer does with a record its formatter rejects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FormatErrorPolicy {
    /// Log the record with its resource and keep going
    #[default]
    Skip,
    /// End the importer with a format error
    Abort,
}

/// Formatter configuration attached to a resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FormatterBuilder {
    Csv(CsvFormatConfig),
    Tsv(CsvFormatConfig),
    Json(JsonFormatConfig),
}

impl Default for FormatterBuilder {
    fn default() -> Self {
        FormatterBuilder::Csv(CsvFormatConfig::default())
    }
}

impl FormatterBuilder {
    pub fn name(&self) -> &'static str {
        match self {
            FormatterBuilder::Csv(_) => "csv",
            FormatterBuilder::Tsv(_) => "tsv",
            FormatterBuilder::Json(_) => "json",
        }
    }

    /// Validate the configuration and build the formatter.
    ///
    /// Has no side effects; safe to call at configuration time.
    pub fn build(&self) -> ConnectorResult<Box<dyn Formatter>> {
        match self {
            FormatterBuilder::Csv(config) => Ok(Box::new(CsvFormatter::new(config.clone())?)),
            FormatterBuilder::Tsv(config) => {
                let config = CsvFormatConfig {
                    delimiter: CsvDelimiter::Tab,
                    ..config.clone()
                };
                Ok(Box::new(CsvFormatter::new(config)?))
            }
            FormatterBuilder::Json(config) => Ok(Box::new(JsonFormatter::new(config.clone())?)),
        }
    }
}

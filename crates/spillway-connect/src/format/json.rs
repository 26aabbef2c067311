//! JSON object formatting
//!
//! Each record is one JSON object. The configured `fields` pick values out of
//! it in column order; a missing field becomes NULL. Values are typed by the
//! optional `column_types`, otherwise numbers map to INTEGER/FLOAT, strings to
//! STRING and nested arrays/objects are kept as their JSON text.

use super::{FormatError, Formatter};
use crate::error::{ConnectorError, ConnectorResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use spillway_protocol::{ColumnType, ColumnValue};
use std::collections::HashSet;

/// Configuration for [`JsonFormatter`]
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct JsonFormatConfig {
    /// Object keys to extract, in column order
    pub fields: Vec<String>,

    /// Optional column types, one per field
    #[serde(default)]
    #[schemars(with = "Vec<String>")]
    pub column_types: Vec<ColumnType>,
}

/// Formatter for one JSON object per record
#[derive(Debug)]
pub struct JsonFormatter {
    config: JsonFormatConfig,
}

impl JsonFormatter {
    pub fn new(config: JsonFormatConfig) -> ConnectorResult<Self> {
        if config.fields.is_empty() {
            return Err(ConnectorError::missing_property("fields"));
        }
        let mut seen = HashSet::new();
        for field in &config.fields {
            if !seen.insert(field.as_str()) {
                return Err(ConnectorError::config(format!(
                    "duplicate field '{}' in json formatter",
                    field
                )));
            }
        }
        if !config.column_types.is_empty() && config.column_types.len() != config.fields.len() {
            return Err(ConnectorError::config(format!(
                "json formatter has {} fields but {} column_types",
                config.fields.len(),
                config.column_types.len()
            )));
        }
        Ok(Self { config })
    }

    fn convert(&self, column: usize, value: &Value) -> Result<ColumnValue, FormatError> {
        if value.is_null() {
            return Ok(ColumnValue::Null);
        }

        if let Some(ty) = self.config.column_types.get(column) {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Bool(b) => return Err(FormatError::Value {
                    column,
                    reason: format!("boolean {} cannot be stored as {}", b, ty),
                }),
                other => other.to_string(),
            };
            return ty
                .parse_value(&text)
                .map_err(|reason| FormatError::Value { column, reason });
        }

        Ok(match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => ColumnValue::Integer(i),
                None => ColumnValue::Float(n.as_f64().ok_or_else(|| FormatError::Value {
                    column,
                    reason: format!("number {} out of range", n),
                })?),
            },
            Value::String(s) => ColumnValue::String(s.clone()),
            Value::Bool(b) => ColumnValue::Integer(i64::from(*b)),
            other => ColumnValue::String(other.to_string()),
        })
    }
}

impl Formatter for JsonFormatter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn transform(&self, record: &[u8]) -> Result<Vec<ColumnValue>, FormatError> {
        let value: Value =
            serde_json::from_slice(record).map_err(|e| FormatError::Malformed(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(FormatError::Malformed("record is not a JSON object".into()));
        };

        self.config
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| self.convert(i, map.get(field).unwrap_or(&Value::Null)))
            .collect()
    }
}

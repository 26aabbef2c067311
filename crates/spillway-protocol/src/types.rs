//! Data source and row value types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProtocolError, Result};

/// Key of one export stream: one table on one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId {
    pub partition_id: u32,
    pub table_id: u32,
}

impl SourceId {
    pub fn new(partition_id: u32, table_id: u32) -> Self {
        Self {
            partition_id,
            table_id,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}/t{}", self.partition_id, self.table_id)
    }
}

/// SQL column type as advertised by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Decimal,
    String,
    Timestamp,
    VarBinary,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::TinyInt => "TINYINT",
            ColumnType::SmallInt => "SMALLINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Decimal => "DECIMAL",
            ColumnType::String => "STRING",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::VarBinary => "VARBINARY",
        }
    }

    /// Parse a textual cell into a typed value of this column type.
    ///
    /// Integer types are range-checked against their SQL width. Timestamps
    /// are accepted as microseconds since the epoch. `VARBINARY` expects hex.
    pub fn parse_value(&self, text: &str) -> std::result::Result<ColumnValue, String> {
        let trimmed = text.trim();
        match self {
            ColumnType::TinyInt
            | ColumnType::SmallInt
            | ColumnType::Integer
            | ColumnType::BigInt => {
                let v: i64 = trimmed
                    .parse()
                    .map_err(|e| format!("'{}' is not a valid {}: {}", text, self.as_str(), e))?;
                let (min, max) = match self {
                    ColumnType::TinyInt => (i8::MIN as i64, i8::MAX as i64),
                    ColumnType::SmallInt => (i16::MIN as i64, i16::MAX as i64),
                    ColumnType::Integer => (i32::MIN as i64, i32::MAX as i64),
                    _ => (i64::MIN, i64::MAX),
                };
                if v < min || v > max {
                    return Err(format!("{} out of range for {}", v, self.as_str()));
                }
                Ok(ColumnValue::Integer(v))
            }
            ColumnType::Float => trimmed
                .parse::<f64>()
                .map(ColumnValue::Float)
                .map_err(|e| format!("'{}' is not a valid FLOAT: {}", text, e)),
            ColumnType::Decimal => {
                let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
                let valid = !digits.is_empty()
                    && digits.chars().filter(|c| *c == '.').count() <= 1
                    && digits.chars().all(|c| c.is_ascii_digit() || c == '.');
                if valid {
                    Ok(ColumnValue::Decimal(trimmed.to_string()))
                } else {
                    Err(format!("'{}' is not a valid DECIMAL", text))
                }
            }
            ColumnType::String => Ok(ColumnValue::String(text.to_string())),
            ColumnType::Timestamp => trimmed
                .parse::<i64>()
                .map(ColumnValue::Timestamp)
                .map_err(|e| format!("'{}' is not a valid TIMESTAMP: {}", text, e)),
            ColumnType::VarBinary => decode_hex(trimmed)
                .map(|b| ColumnValue::Bytes(Bytes::from(b)))
                .ok_or_else(|| format!("'{}' is not valid hex for VARBINARY", text)),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TINYINT" => Ok(ColumnType::TinyInt),
            "SMALLINT" => Ok(ColumnType::SmallInt),
            "INTEGER" | "INT" => Ok(ColumnType::Integer),
            "BIGINT" => Ok(ColumnType::BigInt),
            "FLOAT" | "DOUBLE" => Ok(ColumnType::Float),
            "DECIMAL" => Ok(ColumnType::Decimal),
            "STRING" | "VARCHAR" => Ok(ColumnType::String),
            "TIMESTAMP" => Ok(ColumnType::Timestamp),
            "VARBINARY" => Ok(ColumnType::VarBinary),
            _ => Err(format!("Unknown column type: {}", s)),
        }
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

/// One column of a table's schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Identity and schema of one export stream.
///
/// Created when a table on a partition becomes eligible for export and never
/// mutated afterwards. A schema change produces a new descriptor with a higher
/// `generation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    pub partition_id: u32,
    pub table_id: u32,
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
    /// Catalog generation the schema belongs to
    #[serde(default)]
    pub generation: u64,
}

impl DataSourceDescriptor {
    pub fn new(partition_id: u32, table_id: u32, table_name: impl Into<String>) -> Self {
        Self {
            partition_id,
            table_id,
            table_name: table_name.into(),
            columns: Vec::new(),
            generation: 0,
        }
    }

    /// Append a column (builder pattern)
    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnSchema::new(name, column_type));
        self
    }

    /// Set the catalog generation (builder pattern)
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn source_id(&self) -> SourceId {
        SourceId::new(self.partition_id, self.table_id)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

impl fmt::Display for DataSourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (partition {}, table {}, generation {})",
            self.table_name, self.partition_id, self.table_id, self.generation
        )
    }
}

/// A single typed column value inside a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Integer(i64),
    Float(f64),
    /// Exact decimal kept in its canonical textual form
    Decimal(String),
    String(String),
    /// Microseconds since the Unix epoch
    Timestamp(i64),
    Bytes(#[serde(with = "crate::serde_utils::bytes_serde")] Bytes),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnValue::Null => "NULL",
            ColumnValue::Integer(_) => "INTEGER",
            ColumnValue::Float(_) => "FLOAT",
            ColumnValue::Decimal(_) => "DECIMAL",
            ColumnValue::String(_) => "STRING",
            ColumnValue::Timestamp(_) => "TIMESTAMP",
            ColumnValue::Bytes(_) => "VARBINARY",
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::Integer(v) => write!(f, "{}", v),
            ColumnValue::Float(v) => write!(f, "{}", v),
            ColumnValue::Decimal(v) | ColumnValue::String(v) => write!(f, "{}", v),
            ColumnValue::Timestamp(v) => write!(f, "{}", v),
            ColumnValue::Bytes(b) => {
                for byte in b.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Integer(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::String(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::String(v)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ColumnValue::Null)
    }
}

/// Number of row bytes fully acknowledged for one source.
///
/// Only moves forward. [`StreamOffset::advance_to`] refuses to go backwards so
/// a regression surfaces as an error instead of silently re-exporting data.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StreamOffset(u64);

impl StreamOffset {
    pub const ZERO: StreamOffset = StreamOffset(0);

    pub fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Offset just past a block of `len` bytes starting here
    pub fn end_of_block(&self, len: usize) -> Result<StreamOffset> {
        self.0
            .checked_add(len as u64)
            .map(StreamOffset)
            .ok_or_else(|| ProtocolError::InvalidFormat("stream offset overflow".into()))
    }

    /// Move forward to `next`. Equal offsets are accepted.
    pub fn advance_to(&mut self, next: StreamOffset) -> Result<()> {
        if next.0 < self.0 {
            return Err(ProtocolError::OffsetRegression {
                current: self.0,
                requested: next.0,
            });
        }
        self.0 = next.0;
        Ok(())
    }
}

impl fmt::Display for StreamOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StreamOffset {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let desc = DataSourceDescriptor::new(2, 9, "orders")
            .with_column("id", ColumnType::BigInt)
            .with_column("note", ColumnType::String)
            .with_generation(4);

        assert_eq!(desc.source_id(), SourceId::new(2, 9));
        assert_eq!(desc.column_names().collect::<Vec<_>>(), vec!["id", "note"]);
        assert_eq!(desc.generation, 4);
        assert_eq!(
            desc.to_string(),
            "orders (partition 2, table 9, generation 4)"
        );
    }

    #[test]
    fn test_source_id_display() {
        assert_eq!(SourceId::new(0, 12).to_string(), "p0/t12");
    }

    #[test]
    fn test_offset_advance() {
        let mut offset = StreamOffset::ZERO;
        offset.advance_to(StreamOffset::new(10)).unwrap();
        offset.advance_to(StreamOffset::new(10)).unwrap();
        assert_eq!(offset.get(), 10);

        let err = offset.advance_to(StreamOffset::new(3)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::OffsetRegression {
                current: 10,
                requested: 3
            }
        ));
        assert_eq!(offset.get(), 10);
    }

    #[test]
    fn test_offset_end_of_block() {
        let start = StreamOffset::new(100);
        assert_eq!(start.end_of_block(28).unwrap(), StreamOffset::new(128));
        assert!(StreamOffset::new(u64::MAX).end_of_block(1).is_err());
    }

    #[test]
    fn test_column_type_from_str() {
        assert_eq!("bigint".parse::<ColumnType>().unwrap(), ColumnType::BigInt);
        assert_eq!("VARCHAR".parse::<ColumnType>().unwrap(), ColumnType::String);
        assert!("GEOGRAPHY".parse::<ColumnType>().is_err());
    }

    #[test]
    fn test_parse_value_integers() {
        assert_eq!(
            ColumnType::Integer.parse_value(" 42 ").unwrap(),
            ColumnValue::Integer(42)
        );
        assert!(ColumnType::TinyInt.parse_value("300").is_err());
        assert!(ColumnType::BigInt.parse_value("4x").is_err());
    }

    #[test]
    fn test_parse_value_other_types() {
        assert_eq!(
            ColumnType::Decimal.parse_value("-12.50").unwrap(),
            ColumnValue::Decimal("-12.50".into())
        );
        assert!(ColumnType::Decimal.parse_value("1.2.3").is_err());
        assert_eq!(
            ColumnType::VarBinary.parse_value("00ff").unwrap(),
            ColumnValue::Bytes(Bytes::from_static(&[0x00, 0xff]))
        );
        assert!(ColumnType::VarBinary.parse_value("abc").is_err());
        assert_eq!(
            ColumnType::String.parse_value(" padded ").unwrap(),
            ColumnValue::String(" padded ".into())
        );
    }

    #[test]
    fn test_column_value_display() {
        assert_eq!(ColumnValue::Null.to_string(), "NULL");
        assert_eq!(ColumnValue::from(7i64).to_string(), "7");
        assert_eq!(
            ColumnValue::Bytes(Bytes::from_static(&[0xde, 0xad])).to_string(),
            "dead"
        );
        assert_eq!(ColumnValue::from(None::<i64>), ColumnValue::Null);
    }

    #[test]
    fn test_column_schema_json() {
        let col: ColumnSchema =
            serde_json::from_str(r#"{"name":"ts","column_type":"TIMESTAMP"}"#).unwrap();
        assert_eq!(col.column_type, ColumnType::Timestamp);
        assert!(col.nullable);
    }
}

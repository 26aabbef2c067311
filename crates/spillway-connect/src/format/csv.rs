//! Delimited text formatting
//!
//! Parsing side: [`CsvFormatter`] splits one line into fields following
//! RFC 4180 quoting (quoted fields may contain the delimiter and doubled
//! quotes), then optionally types each field with the configured column
//! types.
//!
//! Writing side: [`escape_field`] quotes a field for output, used by the CSV
//! export decoder.

use super::{FormatError, Formatter};
use crate::error::{ConnectorError, ConnectorResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use spillway_protocol::{ColumnType, ColumnValue};

/// CSV delimiter options
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CsvDelimiter {
    /// Comma (,) - standard CSV
    #[default]
    Comma,
    /// Tab (\t) - TSV format
    Tab,
    /// Semicolon (;) - common in European locales
    Semicolon,
    /// Pipe (|) - useful when data contains commas
    Pipe,
}

impl CsvDelimiter {
    pub fn as_char(&self) -> char {
        match self {
            CsvDelimiter::Comma => ',',
            CsvDelimiter::Tab => '\t',
            CsvDelimiter::Semicolon => ';',
            CsvDelimiter::Pipe => '|',
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            CsvDelimiter::Tab => "tsv",
            _ => "csv",
        }
    }
}

/// Configuration for [`CsvFormatter`]
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CsvFormatConfig {
    /// Field delimiter
    #[serde(default)]
    pub delimiter: CsvDelimiter,

    /// Quote character (default: double quote)
    #[serde(default = "default_quote_char")]
    pub quote_char: char,

    /// Trim surrounding whitespace from unquoted fields
    #[serde(default)]
    pub trim: bool,

    /// Unquoted field text that stands for SQL NULL (e.g. `\N`)
    #[serde(default)]
    pub null_value: Option<String>,

    /// Column types of the destination table. When set, every record must have
    /// exactly this many fields and each field is parsed to its type.
    #[serde(default)]
    #[schemars(with = "Vec<String>")]
    pub column_types: Vec<ColumnType>,

    /// Required field count when `column_types` is not given
    #[serde(default)]
    pub expected_columns: Option<usize>,
}

fn default_quote_char() -> char {
    '"'
}

impl Default for CsvFormatConfig {
    fn default() -> Self {
        Self {
            delimiter: CsvDelimiter::default(),
            quote_char: default_quote_char(),
            trim: false,
            null_value: None,
            column_types: Vec::new(),
            expected_columns: None,
        }
    }
}

impl CsvFormatConfig {
    fn validate(&self) -> ConnectorResult<()> {
        let delimiter = self.delimiter.as_char();
        if self.quote_char == delimiter {
            return Err(ConnectorError::config(format!(
                "quote_char '{}' must differ from the delimiter",
                self.quote_char
            )));
        }
        if self.quote_char == '\n' || self.quote_char == '\r' {
            return Err(ConnectorError::config("quote_char must not be a line break"));
        }
        if self.expected_columns == Some(0) {
            return Err(ConnectorError::config("expected_columns must be at least 1"));
        }
        if let Some(expected) = self.expected_columns {
            if !self.column_types.is_empty() && expected != self.column_types.len() {
                return Err(ConnectorError::config(format!(
                    "expected_columns ({}) disagrees with column_types ({} entries)",
                    expected,
                    self.column_types.len()
                )));
            }
        }
        Ok(())
    }

    fn required_columns(&self) -> Option<usize> {
        if self.column_types.is_empty() {
            self.expected_columns
        } else {
            Some(self.column_types.len())
        }
    }
}

/// Formatter for one line of delimited text
#[derive(Debug)]
pub struct CsvFormatter {
    config: CsvFormatConfig,
}

impl CsvFormatter {
    pub fn new(config: CsvFormatConfig) -> ConnectorResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Split a line into raw fields. The flag tells whether the field was quoted.
    fn split(&self, line: &str) -> Result<Vec<(String, bool)>, FormatError> {
        let delimiter = self.config.delimiter.as_char();
        let quote = self.config.quote_char;

        let mut fields = Vec::new();
        let mut field = String::new();
        let mut quoted = false;
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if in_quotes {
                if c == quote {
                    if chars.peek() == Some(&quote) {
                        field.push(quote);
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    field.push(c);
                }
            } else if c == quote {
                if !field.trim().is_empty() {
                    return Err(FormatError::Malformed(format!(
                        "quote inside unquoted field {:?}",
                        field
                    )));
                }
                field.clear();
                quoted = true;
                in_quotes = true;
            } else if c == delimiter {
                fields.push((std::mem::take(&mut field), quoted));
                quoted = false;
            } else if quoted && !c.is_whitespace() {
                return Err(FormatError::Malformed(
                    "characters after closing quote".to_string(),
                ));
            } else if !quoted {
                field.push(c);
            }
        }

        if in_quotes {
            return Err(FormatError::UnterminatedQuote);
        }
        fields.push((field, quoted));
        Ok(fields)
    }

    fn to_value(
        &self,
        column: usize,
        raw: String,
        quoted: bool,
    ) -> Result<ColumnValue, FormatError> {
        let text = if self.config.trim && !quoted {
            raw.trim().to_string()
        } else {
            raw
        };

        if !quoted {
            if let Some(null) = &self.config.null_value {
                if &text == null {
                    return Ok(ColumnValue::Null);
                }
            }
        }

        match self.config.column_types.get(column) {
            Some(ty) => ty
                .parse_value(&text)
                .map_err(|reason| FormatError::Value { column, reason }),
            None => Ok(ColumnValue::String(text)),
        }
    }
}

impl Formatter for CsvFormatter {
    fn name(&self) -> &'static str {
        self.config.delimiter.extension()
    }

    fn transform(&self, record: &[u8]) -> Result<Vec<ColumnValue>, FormatError> {
        let line = std::str::from_utf8(record).map_err(|e| FormatError::Encoding(e.to_string()))?;
        let line = line.trim_end_matches(['\r', '\n']);

        let fields = self.split(line)?;
        if let Some(expected) = self.config.required_columns() {
            if fields.len() != expected {
                return Err(FormatError::ColumnCount {
                    expected,
                    found: fields.len(),
                });
            }
        }

        fields
            .into_iter()
            .enumerate()
            .map(|(i, (raw, quoted))| self.to_value(i, raw, quoted))
            .collect()
    }
}

/// Escape a field value according to RFC 4180
pub fn escape_field(field: &str, delimiter: char, quote: char) -> String {
    let needs_quoting = field.contains(delimiter)
        || field.contains(quote)
        || field.contains('\n')
        || field.contains('\r');

    if needs_quoting {
        let escaped = field.replace(quote, &format!("{}{}", quote, quote));
        format!("{}{}{}", quote, escaped, quote)
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter(config: CsvFormatConfig) -> CsvFormatter {
        CsvFormatter::new(config).unwrap()
    }

    #[test]
    fn test_plain_fields() {
        let f = formatter(CsvFormatConfig::default());
        let row = f.transform(b"a,b,,c\n").unwrap();
        assert_eq!(
            row,
            vec![
                ColumnValue::from("a"),
                ColumnValue::from("b"),
                ColumnValue::from(""),
                ColumnValue::from("c"),
            ]
        );
    }

    #[test]
    fn test_quoted_fields() {
        let f = formatter(CsvFormatConfig::default());
        let row = f.transform(br#"1,"hello, ""world""",x"#).unwrap();
        assert_eq!(row[1], ColumnValue::from(r#"hello, "world""#));
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_unterminated_quote() {
        let f = formatter(CsvFormatConfig::default());
        assert_eq!(
            f.transform(br#"1,"open"#).unwrap_err(),
            FormatError::UnterminatedQuote
        );
    }

    #[test]
    fn test_garbage_after_quote() {
        let f = formatter(CsvFormatConfig::default());
        assert!(matches!(
            f.transform(br#""a"b,c"#),
            Err(FormatError::Malformed(_))
        ));
    }

    #[test]
    fn test_typed_columns_and_null() {
        let f = formatter(CsvFormatConfig {
            column_types: vec![ColumnType::Integer, ColumnType::Float, ColumnType::String],
            null_value: Some("NULL".into()),
            trim: true,
            ..Default::default()
        });

        let row = f.transform(b" 12 , 2.5 ,NULL").unwrap();
        assert_eq!(
            row,
            vec![
                ColumnValue::Integer(12),
                ColumnValue::Float(2.5),
                ColumnValue::Null
            ]
        );

        // quoted NULL stays a string
        let row = f.transform(br#"1,0,"NULL""#).unwrap();
        assert_eq!(row[2], ColumnValue::from("NULL"));
    }

    #[test]
    fn test_column_count_enforced() {
        let f = formatter(CsvFormatConfig {
            expected_columns: Some(2),
            ..Default::default()
        });
        assert_eq!(
            f.transform(b"a,b,c").unwrap_err(),
            FormatError::ColumnCount {
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn test_bad_value_reports_column() {
        let f = formatter(CsvFormatConfig {
            column_types: vec![ColumnType::Integer, ColumnType::Integer],
            ..Default::default()
        });
        match f.transform(b"1,two") {
            Err(FormatError::Value { column, .. }) => assert_eq!(column, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8() {
        let f = formatter(CsvFormatConfig::default());
        assert!(matches!(
            f.transform(&[0xff, 0xfe]),
            Err(FormatError::Encoding(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(CsvFormatter::new(CsvFormatConfig {
            expected_columns: Some(0),
            ..Default::default()
        })
        .is_err());
        assert!(CsvFormatter::new(CsvFormatConfig {
            expected_columns: Some(3),
            column_types: vec![ColumnType::String],
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain", ',', '"'), "plain");
        assert_eq!(escape_field("a,b", ',', '"'), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\"", ',', '"'), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines", '|', '"'), "\"two\nlines\"");
    }
}

//! Resource identifiers and descriptors

use crate::error::{ConnectorError, ConnectorResult};
use crate::format::FormatterBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use url::Url;

/// Stable, globally unique name of one external import source.
///
/// Two importers with equal ids are considered the same work, whichever
/// node runs them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(Url);

impl ResourceId {
    pub fn parse(uri: &str) -> ConnectorResult<Self> {
        Url::parse(uri)
            .map(Self)
            .map_err(|e| ConnectorError::config(format!("invalid resource uri '{}': {}", uri, e)))
    }

    /// `file://` id for a local path. Relative paths are resolved against the
    /// current directory so the id does not depend on how the path was spelled.
    pub fn from_file_path(path: &Path) -> ConnectorResult<Self> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Url::from_file_path(&absolute).map(Self).map_err(|_| {
            ConnectorError::config(format!(
                "cannot build resource uri from path '{}'",
                absolute.display()
            ))
        })
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One external resource to import plus its formatter and properties
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub resource_id: ResourceId,
    pub formatter: FormatterBuilder,
    pub properties: HashMap<String, String>,
}

impl ResourceDescriptor {
    pub fn new(resource_id: ResourceId, formatter: FormatterBuilder) -> Self {
        Self {
            resource_id,
            formatter,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// A property that must be present and non-blank
    pub fn require(&self, key: &str) -> ConnectorResult<&str> {
        require_property(&self.properties, key)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Look up a required property, failing with an error that names it
pub fn require_property<'a>(
    properties: &'a HashMap<String, String>,
    key: &str,
) -> ConnectorResult<&'a str> {
    match properties.get(key).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConnectorError::missing_property(key)),
    }
}

/// Parse an optional property with `FromStr`
pub fn parse_property<T>(
    properties: &HashMap<String, String>,
    key: &str,
) -> ConnectorResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match properties.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            ConnectorError::config(format!("property '{}' has invalid value '{}': {}", key, raw, e))
        }),
    }
}

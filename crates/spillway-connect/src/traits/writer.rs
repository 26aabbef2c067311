//! Write path used by importers
//!
//! The database's insert path lives outside this crate; importers reach it
//! through [`RowWriter`]. Implementations should report back-pressure or
//! temporary unavailability as [`ConnectorError::Transient`] so callers can
//! retry.
//!
//! [`ConnectorError::Transient`]: crate::error::ConnectorError::Transient

use crate::error::ConnectorResult;
use async_trait::async_trait;
use spillway_protocol::ColumnValue;

#[async_trait]
pub trait RowWriter: Send + Sync {
    /// Insert one row into `table`
    async fn write_row(&self, table: &str, row: Vec<ColumnValue>) -> ConnectorResult<()>;
}

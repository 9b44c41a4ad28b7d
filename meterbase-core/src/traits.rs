//! # Core Traits
//!
//! The narrow boundary between meterbase and a column-family store. A real
//! cluster client and the in-process emulator both sit behind it.
//!
//! ## Design Philosophy
//!
//! 1. **Synchronous**: the emulator is in-process; a network client can block
//!    on its own runtime behind this interface
//! 2. **Error Propagation**: every operation returns [`Result`]
//! 3. **Text filters**: scans carry the rendered filter expression, the same
//!    text a real store would receive

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::Result;

/// Column qualifier (`family:qualifier`) to raw cell value
pub type Cells = BTreeMap<String, Bytes>;

/// One scanned row
pub type Row = (Bytes, Cells);

/// Rows produced by a scan, in ascending key order
pub type RowIter = Box<dyn Iterator<Item = Result<Row>> + Send>;

/// Column family descriptor used at table creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamily {
    pub name: String,
    pub max_versions: u32,
}

impl ColumnFamily {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_versions: 1,
        }
    }

    pub fn with_max_versions(mut self, max_versions: u32) -> Self {
        self.max_versions = max_versions;
        self
    }
}

/// Range scan request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    /// Rendered filter expression
    pub filter: Option<String>,
    /// Inclusive
    pub row_start: Option<Bytes>,
    /// Exclusive
    pub row_stop: Option<Bytes>,
    /// Projection; empty means every column
    pub columns: Vec<String>,
    pub limit: Option<usize>,
}

impl ScanRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Option<impl Into<String>>) -> Self {
        self.filter = filter.map(Into::into);
        self
    }

    pub fn row_start(mut self, start: Option<impl Into<Bytes>>) -> Self {
        self.row_start = start.map(Into::into);
        self
    }

    pub fn row_stop(mut self, stop: Option<impl Into<Bytes>>) -> Self {
        self.row_stop = stop.map(Into::into);
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

/// A table of rows
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    /// Merge cells into a row. `timestamp` selects the version bucket.
    fn put(&self, row: &[u8], cells: Cells, timestamp: Option<u64>) -> Result<()>;

    /// Read one row; an absent row is an empty map
    fn row(&self, row: &[u8], columns: &[String]) -> Result<Cells>;

    /// Delete a whole row, or only the named columns
    fn delete(&self, row: &[u8], columns: Option<&[String]>) -> Result<()>;

    /// Range scan with optional server-side filter
    fn scan(&self, request: ScanRequest) -> Result<RowIter>;
}

/// A handle to a store holding named tables
pub trait Connection: Send + Sync {
    /// Fails with `TableExists` if the table is already there
    fn create_table(&self, name: &str, families: &[ColumnFamily]) -> Result<()>;

    fn delete_table(&self, name: &str) -> Result<()>;

    fn table(&self, name: &str) -> Result<Arc<dyn Table>>;

    fn table_names(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_request_builder() {
        let req = ScanRequest::new()
            .filter(Some("ColumnPrefixFilter ('m_')"))
            .row_start(Some("a"))
            .row_stop(None::<Bytes>)
            .columns(["f:message"])
            .limit(Some(10));
        assert_eq!(req.filter.as_deref(), Some("ColumnPrefixFilter ('m_')"));
        assert_eq!(req.row_start, Some(Bytes::from("a")));
        assert!(req.row_stop.is_none());
        assert_eq!(req.columns, vec!["f:message".to_string()]);
        assert_eq!(req.limit, Some(10));
    }
}

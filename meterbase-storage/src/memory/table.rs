use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use meterbase_core::{
    error::{Error, Result},
    metrics::Metrics,
    traits::{Cells, ColumnFamily, Row, RowIter, ScanRequest, Table},
};

use crate::filter;

/// Version bucket used when a put carries no timestamp
pub const DEFAULT_BUCKET: u64 = 0;

/// Timestamp bucket to the cells written in it
type RowVersions = BTreeMap<u64, Cells>;

/// One emulated table
pub struct MemoryTable {
    name: String,
    /// Declared families; empty accepts any
    families: Vec<ColumnFamily>,
    rows: RwLock<BTreeMap<Bytes, RowVersions>>,
    metrics: Metrics,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            name: name.into(),
            families: Vec::new(),
            rows: RwLock::new(BTreeMap::new()),
            metrics,
        }
    }

    /// Restrict writes to the given families
    pub fn with_families(mut self, families: &[ColumnFamily]) -> Self {
        self.families = families.to_vec();
        self
    }

    pub fn families(&self) -> &[ColumnFamily] {
        &self.families
    }

    fn check_families(&self, cells: &Cells) -> Result<()> {
        if self.families.is_empty() {
            return Ok(());
        }
        for col in cells.keys() {
            let family = col.split_once(':').map_or(col.as_str(), |(family, _)| family);
            if !self.families.iter().any(|f| f.name == family) {
                return Err(Error::Backend {
                    message: format!("table {} has no column family '{}'", self.name, family),
                    source: None,
                });
            }
        }
        Ok(())
    }

    /// Merged view of every row, in key order
    pub fn snapshot(&self) -> Vec<Row> {
        self.rows
            .read()
            .iter()
            .map(|(key, versions)| (key.clone(), merge(versions)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

/// Oldest bucket first, so newer buckets overwrite per qualifier
fn merge(versions: &RowVersions) -> Cells {
    let mut cells = Cells::new();
    for bucket in versions.values() {
        cells.extend(bucket.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    cells
}

/// Keep columns named exactly, or belonging to a named family
fn project(mut cells: Cells, columns: &[String]) -> Cells {
    if columns.is_empty() {
        return cells;
    }
    cells.retain(|col, _| {
        columns.iter().any(|wanted| {
            if wanted.contains(':') {
                col == wanted
            } else {
                col.split_once(':').map(|(family, _)| family) == Some(wanted.as_str())
            }
        })
    });
    cells
}

impl Table for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, row: &[u8], cells: Cells, timestamp: Option<u64>) -> Result<()> {
        self.check_families(&cells)?;
        let bucket = timestamp.unwrap_or(DEFAULT_BUCKET);
        let mut rows = self.rows.write();
        rows.entry(Bytes::copy_from_slice(row))
            .or_default()
            .entry(bucket)
            .or_default()
            .extend(cells);
        self.metrics.record_put();
        Ok(())
    }

    fn row(&self, row: &[u8], columns: &[String]) -> Result<Cells> {
        let rows = self.rows.read();
        Ok(rows
            .get(row)
            .map(|versions| project(merge(versions), columns))
            .unwrap_or_default())
    }

    fn delete(&self, row: &[u8], columns: Option<&[String]>) -> Result<()> {
        let mut rows = self.rows.write();
        match columns {
            None => {
                rows.remove(row);
            }
            Some(columns) => {
                if let Some(versions) = rows.get_mut(row) {
                    for bucket in versions.values_mut() {
                        for col in columns {
                            bucket.remove(col);
                        }
                    }
                    versions.retain(|_, bucket| !bucket.is_empty());
                    if versions.is_empty() {
                        rows.remove(row);
                    }
                }
            }
        }
        self.metrics.record_delete();
        Ok(())
    }

    fn scan(&self, request: ScanRequest) -> Result<RowIter> {
        let expr = match request.filter.as_deref().map(filter::parse).transpose() {
            Ok(expr) => expr,
            Err(e) => {
                self.metrics.record_filter_error();
                return Err(e);
            }
        };

        let lower = match &request.row_start {
            Some(start) => Bound::Included(start.clone()),
            None => Bound::Unbounded,
        };
        let upper = match &request.row_stop {
            Some(stop) => Bound::Excluded(stop.clone()),
            None => Bound::Unbounded,
        };
        let inverted = matches!(
            (&request.row_start, &request.row_stop),
            (Some(start), Some(stop)) if start > stop
        );

        // Snapshot under the read lock; filtering happens after release
        let matched: Vec<Row> = if inverted {
            Vec::new()
        } else {
            self.rows
                .read()
                .range((lower, upper))
                .map(|(key, versions)| (key.clone(), project(merge(versions), &request.columns)))
                .collect()
        };

        let mut rows = match &expr {
            Some(expr) => match filter::apply(expr, matched) {
                Ok(rows) => rows,
                Err(e) => {
                    self.metrics.record_filter_error();
                    return Err(e);
                }
            },
            None => matched,
        };

        if let Some(limit) = request.limit {
            rows.truncate(limit);
        }

        debug!(
            "Scanned table {}: {} rows (filter: {})",
            self.name,
            rows.len(),
            request.filter.as_deref().unwrap_or("none")
        );
        self.metrics.record_scan(rows.len() as u64);

        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

//! # Metrics
//!
//! Lock-free counters for the store emulator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Write metrics
    puts: AtomicU64,
    deletes: AtomicU64,

    // Scan metrics
    scans: AtomicU64,
    rows_returned: AtomicU64,
    filter_errors: AtomicU64,

    // Schema metrics
    tables_created: AtomicU64,
    tables_deleted: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_put(&self) {
        self.inner.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.inner.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed scan and how many rows it produced
    pub fn record_scan(&self, rows: u64) {
        self.inner.scans.fetch_add(1, Ordering::Relaxed);
        self.inner.rows_returned.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_filter_error(&self) {
        self.inner.filter_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_table_created(&self) {
        self.inner.tables_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_table_deleted(&self) {
        self.inner.tables_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            puts: self.inner.puts.load(Ordering::Relaxed),
            deletes: self.inner.deletes.load(Ordering::Relaxed),
            scans: self.inner.scans.load(Ordering::Relaxed),
            rows_returned: self.inner.rows_returned.load(Ordering::Relaxed),
            filter_errors: self.inner.filter_errors.load(Ordering::Relaxed),
            tables_created: self.inner.tables_created.load(Ordering::Relaxed),
            tables_deleted: self.inner.tables_deleted.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub puts: u64,
    pub deletes: u64,
    pub scans: u64,
    pub rows_returned: u64,
    pub filter_errors: u64,
    pub tables_created: u64,
    pub tables_deleted: u64,
}

impl MetricsSnapshot {
    /// Average rows per scan
    pub fn rows_per_scan(&self) -> f64 {
        if self.scans == 0 {
            0.0
        } else {
            self.rows_returned as f64 / self.scans as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_shared_across_clones() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_scan(3);
        metrics.record_scan(1);
        metrics.record_put();

        let snap = metrics.snapshot();
        assert_eq!(snap.scans, 2);
        assert_eq!(snap.rows_returned, 4);
        assert_eq!(snap.puts, 1);
        assert_eq!(snap.rows_per_scan(), 2.0);
    }
}

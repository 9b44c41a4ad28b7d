use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use meterbase_core::{
    error::{Error, Result},
    metrics::Metrics,
    traits::{ColumnFamily, Connection, Table},
};

use super::table::MemoryTable;

/// In-process store holding any number of [`MemoryTable`]s
#[derive(Clone, Default)]
pub struct MemoryConnection {
    tables: Arc<DashMap<String, Arc<MemoryTable>>>,
    metrics: Metrics,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Metrics) -> Self {
        Self {
            tables: Arc::new(DashMap::new()),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Concrete handle, for callers that need more than [`Table`]
    pub fn memory_table(&self, name: &str) -> Result<Arc<MemoryTable>> {
        self.tables
            .get(name)
            .map(|t| t.value().clone())
            .ok_or_else(|| Error::TableNotFound {
                table: name.to_string(),
            })
    }
}

impl Connection for MemoryConnection {
    fn create_table(&self, name: &str, families: &[ColumnFamily]) -> Result<()> {
        match self.tables.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::TableExists {
                table: name.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(
                    MemoryTable::new(name, self.metrics.clone()).with_families(families),
                ));
                self.metrics.record_table_created();
                info!(
                    "Created table {} with families [{}]",
                    name,
                    families.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
                );
                Ok(())
            }
        }
    }

    fn delete_table(&self, name: &str) -> Result<()> {
        match self.tables.remove(name) {
            Some(_) => {
                self.metrics.record_table_deleted();
                info!("Deleted table {}", name);
                Ok(())
            }
            None => Err(Error::TableNotFound {
                table: name.to_string(),
            }),
        }
    }

    fn table(&self, name: &str) -> Result<Arc<dyn Table>> {
        debug!("Opening table {}", name);
        self.memory_table(name).map(|t| t as Arc<dyn Table>)
    }

    fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

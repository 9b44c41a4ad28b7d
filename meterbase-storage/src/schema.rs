//! # Schema Management
//!
//! Table creation and removal. A table that already exists at creation, or
//! is already gone at removal, is logged and skipped: several agents may
//! race to upgrade the same store.

use tracing::{info, warn};

use meterbase_core::{
    config::StorageConfig,
    error::{Error, Result},
    traits::{ColumnFamily, Connection},
};

use crate::entry::FAMILY;

pub const METER_TABLE: &str = "meter";
pub const RESOURCE_TABLE: &str = "resource";
pub const ALARM_TABLE: &str = "alarm";
pub const ALARM_HISTORY_TABLE: &str = "alarm_h";

/// Create the named logical tables
pub fn create_tables(conn: &dyn Connection, config: &StorageConfig, tables: &[&str]) -> Result<()> {
    let family = ColumnFamily::new(FAMILY).with_max_versions(config.max_versions);
    for table in tables {
        let name = config.table_name(table);
        match conn.create_table(&name, std::slice::from_ref(&family)) {
            Ok(()) => info!("Created table {}", name),
            Err(err @ Error::TableExists { .. }) => warn!("Skipping table creation: {}", err),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Drop the named logical tables
pub fn drop_tables(conn: &dyn Connection, config: &StorageConfig, tables: &[&str]) -> Result<()> {
    for table in tables {
        let name = config.table_name(table);
        match conn.delete_table(&name) {
            Ok(()) => info!("Dropped table {}", name),
            Err(err @ Error::TableNotFound { .. }) => warn!("Skipping table removal: {}", err),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnection;

    #[test]
    fn test_create_is_idempotent() {
        let conn = MemoryConnection::new();
        let config = StorageConfig {
            table_prefix: Some("test".into()),
            ..Default::default()
        };
        create_tables(&conn, &config, &[METER_TABLE, RESOURCE_TABLE]).unwrap();
        create_tables(&conn, &config, &[METER_TABLE, RESOURCE_TABLE]).unwrap();
        assert_eq!(conn.table_names(), vec!["test_meter".to_string(), "test_resource".to_string()]);

        let meter = conn.memory_table("test_meter").unwrap();
        assert_eq!(meter.families(), &[ColumnFamily::new(FAMILY)][..]);

        drop_tables(&conn, &config, &[METER_TABLE, RESOURCE_TABLE]).unwrap();
        drop_tables(&conn, &config, &[METER_TABLE]).unwrap();
        assert!(conn.table_names().is_empty());
    }
}

//! # Key Migration
//!
//! Rewrites rows written with the legacy key layouts into the composite
//! layout:
//!
//! ```text
//! resource   f:m_<rts>+<source>+<name>!<type>!<unit>  ->  f:m_<rts:source:name:type:unit>
//! meter      <name>_<rts>_<message_id>                ->  <name:rts:message_id>
//! ```
//!
//! Rows already in the composite layout are left alone, so a migration can
//! be rerun safely.

use tracing::{debug, info, warn};

use meterbase_core::{
    config::StorageConfig,
    error::{Error, Result},
    traits::{Cells, Connection, ScanRequest, Table},
};

use crate::entry::{column, FAMILY, METER_PREFIX};
use crate::keys::{compose, KeyPart, SEPARATOR};
use crate::schema::{METER_TABLE, RESOURCE_TABLE};

/// What a migration run touched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Resource meter columns rewritten
    pub columns_rewritten: usize,
    /// Meter rows re-keyed
    pub rows_rewritten: usize,
    pub skipped_tables: Vec<String>,
}

/// Migrate the named logical tables. Unknown names are skipped.
pub fn migrate_tables(conn: &dyn Connection, config: &StorageConfig, tables: &[&str]) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    for table in tables {
        match *table {
            RESOURCE_TABLE => {
                let handle = conn.table(&config.table_name(RESOURCE_TABLE))?;
                report.columns_rewritten += migrate_resource_table(handle.as_ref())?;
            }
            METER_TABLE => {
                let handle = conn.table(&config.table_name(METER_TABLE))?;
                report.rows_rewritten += migrate_meter_table(handle.as_ref())?;
            }
            other => {
                warn!("No migration for table {}", other);
                report.skipped_tables.push(other.to_string());
            }
        }
    }
    info!(
        "Migration done: {} resource columns, {} meter rows",
        report.columns_rewritten, report.rows_rewritten
    );
    Ok(report)
}

fn migrate_resource_table(table: &dyn Table) -> Result<usize> {
    let meter_family = format!("{}:{}", FAMILY, METER_PREFIX);
    let mut rewritten = 0;

    for row in table.scan(ScanRequest::new())? {
        let (key, cells) = row?;
        let mut updated = Cells::new();
        let mut legacy = Vec::new();

        for (col, value) in &cells {
            let Some(qualifier) = col.strip_prefix(&meter_family) else {
                continue;
            };
            if let Some(parts) = legacy_meter_qualifier(qualifier)? {
                updated.insert(column(&format!("{}{}", METER_PREFIX, compose(parts))), value.clone());
                legacy.push(col.clone());
            }
        }

        if legacy.is_empty() {
            continue;
        }
        debug!("Rewriting {} meter columns of resource {:?}", legacy.len(), key);
        rewritten += legacy.len();
        table.put(&key, updated, None)?;
        table.delete(&key, Some(legacy.as_slice()))?;
    }
    Ok(rewritten)
}

/// Split `<rts>+<source>+<name>!<type>!<unit>`. `None` for qualifiers
/// already in composite form.
fn legacy_meter_qualifier(qualifier: &str) -> Result<Option<[&str; 5]>> {
    if qualifier.contains(SEPARATOR) || !qualifier.contains('+') {
        return Ok(None);
    }
    let malformed = || Error::codec(format!("malformed legacy meter qualifier '{}'", qualifier));

    let mut head = qualifier.splitn(3, '+');
    let (Some(rts), Some(source), Some(rest)) = (head.next(), head.next(), head.next()) else {
        return Err(malformed());
    };
    let mut tail = rest.splitn(3, '!');
    let (Some(name), Some(meter_type), Some(unit)) = (tail.next(), tail.next(), tail.next()) else {
        return Err(malformed());
    };
    Ok(Some([rts, source, name, meter_type, unit]))
}

fn migrate_meter_table(table: &dyn Table) -> Result<usize> {
    let mut rewritten = 0;

    for row in table.scan(ScanRequest::new())? {
        let (key, cells) = row?;
        let key_text = std::str::from_utf8(&key).map_err(|_| Error::codec("meter row key is not UTF-8"))?;
        let Some((name, rts, message_id)) = legacy_meter_key(key_text)? else {
            continue;
        };

        let new_key = compose([KeyPart::from(name), KeyPart::from(rts), KeyPart::from(message_id)]);
        table.put(new_key.as_bytes(), cells, None)?;
        table.delete(&key, None)?;
        rewritten += 1;
    }
    Ok(rewritten)
}

/// Split `<name>_<rts>_<message_id>` from the right, since meter names may
/// themselves contain underscores. `None` for composite keys.
fn legacy_meter_key(key: &str) -> Result<Option<(&str, i64, &str)>> {
    if key.contains(SEPARATOR) {
        return Ok(None);
    }
    let malformed = || Error::codec(format!("malformed legacy meter row key '{}'", key));

    let mut parts = key.rsplitn(3, '_');
    let (Some(message_id), Some(rts), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed());
    };
    let rts = rts.parse::<i64>().map_err(|_| malformed())?;
    Ok(Some((name, rts, message_id)))
}

//! JSON dumps of emulator contents.
//!
//! A dump holds the merged view of each row, so version buckets are not
//! preserved across an export/import cycle.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use meterbase_core::{
    error::{Error, Result},
    traits::{Cells, ColumnFamily, Connection},
};

use super::MemoryConnection;
use crate::entry::FAMILY;

/// Column to cell text
pub type DumpRow = BTreeMap<String, String>;

/// Table name to row key to columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dump {
    pub tables: BTreeMap<String, BTreeMap<String, DumpRow>>,
}

impl Dump {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }
}

fn text(bytes: &Bytes, what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::codec(format!("{} is not UTF-8 and cannot be dumped", what)))
}

impl MemoryConnection {
    /// Export every table
    pub fn export(&self) -> Result<Dump> {
        let mut dump = Dump::default();
        for name in self.table_names() {
            let table = self.memory_table(&name)?;
            let mut rows = BTreeMap::new();
            for (key, cells) in table.snapshot() {
                let key = text(&key, "row key")?;
                let mut row = DumpRow::new();
                for (col, value) in cells {
                    row.insert(col.clone(), text(&value, &format!("cell {}", col))?);
                }
                rows.insert(key, row);
            }
            dump.tables.insert(name, rows);
        }
        Ok(dump)
    }

    /// Load a dump, creating missing tables
    pub fn import(&self, dump: &Dump) -> Result<()> {
        for (name, rows) in &dump.tables {
            match self.create_table(name, &[ColumnFamily::new(FAMILY)]) {
                Ok(()) | Err(Error::TableExists { .. }) => {}
                Err(e) => return Err(e),
            }
            let table = self.table(name)?;
            for (key, row) in rows {
                let cells: Cells = row
                    .iter()
                    .map(|(c, v)| (c.clone(), Bytes::from(v.clone())))
                    .collect();
                table.put(key.as_bytes(), cells, None)?;
            }
        }
        info!(
            "Imported {} rows across {} tables",
            dump.row_count(),
            dump.tables.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_import() {
        let conn = MemoryConnection::new();
        conn.create_table("alarm", &[ColumnFamily::new(FAMILY)]).unwrap();
        let table = conn.table("alarm").unwrap();
        let mut cells = Cells::new();
        cells.insert("f:name".into(), Bytes::from_static(b"\"cpu\""));
        table.put(b"a1", cells, None).unwrap();

        let dump = conn.export().unwrap();
        let text = dump.to_json().unwrap();

        let other = MemoryConnection::new();
        other.import(&Dump::from_json(&text).unwrap()).unwrap();
        assert_eq!(other.export().unwrap(), dump);
        assert_eq!(dump.row_count(), 1);
    }

    #[test]
    fn test_non_utf8_cannot_be_dumped() {
        let conn = MemoryConnection::new();
        conn.create_table("t", &[]).unwrap();
        let mut cells = Cells::new();
        cells.insert("f:x".into(), Bytes::from_static(&[0xff]));
        conn.table("t").unwrap().put(b"r", cells, None).unwrap();
        assert_eq!(conn.export().unwrap_err().error_code(), "CODEC_ERROR");
    }
}

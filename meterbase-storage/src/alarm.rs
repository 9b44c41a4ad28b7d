//! # Alarm Store
//!
//! Alarms live one per row keyed by alarm id. History entries are keyed
//! `alarm_id:rts`, so one alarm's history is a contiguous, newest-first
//! key range.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use meterbase_core::{
    config::StorageConfig,
    error::{Error, Result, ResultExt},
    traits::{Connection, ScanRequest, Table},
    types::{Alarm, AlarmChange, AlarmChangeFilter, AlarmFilter, Timestamp},
    value::Value,
};

use crate::entry::{deserialize_entry, serialize_entry, Entry};
use crate::keys::{compose, decompose, timestamp, KeyPart};
use crate::query::{
    equalities, make_general_rowkey_scan, make_query, make_timestamp_query, DEFAULT_END_OP,
    DEFAULT_START_OP,
};
use crate::schema::{create_tables, drop_tables, ALARM_HISTORY_TABLE, ALARM_TABLE};

/// Alarm definitions and their history
pub struct AlarmStore {
    conn: Arc<dyn Connection>,
    config: StorageConfig,
}

impl AlarmStore {
    pub fn new(conn: Arc<dyn Connection>, config: StorageConfig) -> Self {
        Self { conn, config }
    }

    fn table(&self, name: &str) -> Result<Arc<dyn Table>> {
        self.conn.table(&self.config.table_name(name))
    }

    pub fn upgrade(&self) -> Result<()> {
        create_tables(self.conn.as_ref(), &self.config, &[ALARM_TABLE, ALARM_HISTORY_TABLE])
    }

    pub fn clear(&self) -> Result<()> {
        drop_tables(self.conn.as_ref(), &self.config, &[ALARM_TABLE, ALARM_HISTORY_TABLE])
    }

    /// Store an alarm and return it as read back
    pub fn update_alarm(&self, alarm: &Alarm) -> Result<Alarm> {
        let table = self.table(ALARM_TABLE)?;
        let cells = serialize_entry(&Entry::from_record(&alarm.to_record()));
        table.put(alarm.alarm_id.as_bytes(), cells, None)?;

        let stored = deserialize_entry(&table.row(alarm.alarm_id.as_bytes(), &[])?, true)?;
        Alarm::from_record(&stored.record()).with_context(|| format!("alarm {}", alarm.alarm_id))
    }

    pub fn create_alarm(&self, alarm: &Alarm) -> Result<Alarm> {
        self.update_alarm(alarm)
    }

    /// Remove an alarm and all of its history
    pub fn delete_alarm(&self, alarm_id: &str) -> Result<()> {
        self.table(ALARM_TABLE)?.delete(alarm_id.as_bytes(), None)?;

        let history = self.table(ALARM_HISTORY_TABLE)?;
        let (start, stop) = make_general_rowkey_scan(Some(alarm_id), "", "");
        let filter = make_query(
            &equalities([("alarm_id", Some(Value::from(alarm_id)))]),
            &Default::default(),
        );
        let request = ScanRequest::new()
            .filter(filter.map(|f| f.to_string()))
            .row_start(start)
            .row_stop(stop);
        let mut removed = 0;
        for row in history.scan(request)? {
            let (key, _) = row?;
            history.delete(&key, None)?;
            removed += 1;
        }
        debug!("Deleted alarm {} and {} history entries", alarm_id, removed);
        Ok(())
    }

    /// Alarms matching the filter, most recently changed first
    pub fn get_alarms(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>> {
        if filter.meter.is_some() {
            return Err(Error::unsupported_operator("get_alarms", "meter"));
        }

        let query = make_query(
            &equalities([
                ("alarm_id", filter.alarm_id.clone().map(Value::from)),
                ("name", filter.name.clone().map(Value::from)),
                ("enabled", filter.enabled.map(Value::from)),
                ("user_id", filter.user.clone().map(Value::from)),
                ("project_id", filter.project.clone().map(Value::from)),
                ("state", filter.state.clone().map(Value::from)),
                ("type", filter.alarm_type.clone().map(Value::from)),
                ("severity", filter.severity.clone().map(Value::from)),
            ]),
            &Default::default(),
        );

        let table = self.table(ALARM_TABLE)?;
        let request = ScanRequest::new().filter(query.map(|q| q.to_string()));
        let mut alarms = Vec::new();
        for row in table.scan(request)? {
            let (_, cells) = row?;
            alarms.push(Alarm::from_record(&deserialize_entry(&cells, true)?.record())?);
        }
        alarms.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(alarms)
    }

    /// Append one history entry
    pub fn record_alarm_change(&self, change: &AlarmChange) -> Result<()> {
        let rts = timestamp(&change.timestamp, true)?;
        let row = compose([KeyPart::from(&change.alarm_id), KeyPart::from(rts)]);
        let cells = serialize_entry(&Entry::from_record(&change.to_record()));
        self.table(ALARM_HISTORY_TABLE)?.put(row.as_bytes(), cells, None)
    }

    /// History of one alarm, newest first
    pub fn get_alarm_changes(&self, filter: &AlarmChangeFilter) -> Result<Vec<AlarmChange>> {
        let query = make_query(
            &equalities([
                ("on_behalf_of", filter.on_behalf_of.clone().map(Value::from)),
                ("type", filter.change_type.map(|t| Value::from(t.as_str()))),
                ("user_id", filter.user.clone().map(Value::from)),
                ("project_id", filter.project.clone().map(Value::from)),
                ("severity", filter.severity.clone().map(Value::from)),
            ]),
            &Default::default(),
        );
        let bounds = make_timestamp_query(
            |rts_start, rts_end| make_general_rowkey_scan(Some(&filter.alarm_id), rts_start, rts_end),
            filter.start_timestamp.as_ref(),
            filter.start_timestamp_op,
            filter.end_timestamp.as_ref(),
            filter.end_timestamp_op,
            true,
        )?;

        let table = self.table(ALARM_HISTORY_TABLE)?;
        let request = ScanRequest::new()
            .filter(query.map(|q| q.to_string()))
            .row_start(bounds.start_row)
            .row_stop(bounds.end_row);

        let mut changes = Vec::new();
        for row in table.scan(request)? {
            let (_, cells) = row?;
            let change = AlarmChange::from_record(&deserialize_entry(&cells, true)?.record())?;
            // Row bounds are inclusive at both ends; apply the exact operators
            if in_range(&change.timestamp, filter) {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    pub fn clear_expired_alarm_history_data(&self, ttl: Duration) -> Result<usize> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Configuration {
            message: format!("invalid ttl: {}", e),
        })?;
        self.clear_alarm_history_before(Utc::now().naive_utc() - ttl)
    }

    /// Delete history entries from before `threshold`
    pub fn clear_alarm_history_before(&self, threshold: Timestamp) -> Result<usize> {
        let rts_threshold = timestamp(&threshold, true)?;
        let table = self.table(ALARM_HISTORY_TABLE)?;

        let mut removed = 0;
        for row in table.scan(ScanRequest::new().columns(["f:timestamp"]))? {
            let (key, _) = row?;
            let key_text = std::str::from_utf8(&key)
                .map_err(|_| Error::codec("alarm history key is not UTF-8"))?;
            let parts = decompose(key_text)?;
            let rts = parts
                .get(1)
                .and_then(|rts| rts.parse::<i64>().ok())
                .ok_or_else(|| Error::codec(format!("malformed alarm history key '{}'", key_text)))?;
            if rts > rts_threshold {
                table.delete(&key, None)?;
                removed += 1;
            }
        }

        info!("Cleared {} alarm history entries older than {}", removed, threshold);
        Ok(removed)
    }
}

fn in_range(ts: &Timestamp, filter: &AlarmChangeFilter) -> bool {
    let after_start = filter
        .start_timestamp
        .as_ref()
        .map_or(true, |start| filter.start_timestamp_op.unwrap_or(DEFAULT_START_OP).holds(ts, start));
    let before_end = filter
        .end_timestamp
        .as_ref()
        .map_or(true, |end| filter.end_timestamp_op.unwrap_or(DEFAULT_END_OP).holds(ts, end));
    after_start && before_end
}

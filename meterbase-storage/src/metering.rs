//! # Metering Store
//!
//! Samples are written twice:
//!
//! ```text
//! resource table   row = resource id
//!                  one denormalized row per resource: ids, source markers,
//!                  a meter marker per (rts, source, name, type, unit),
//!                  flattened + raw metadata
//!
//! meter table      row = counter_name:rts:message_id
//!                  one row per sample, newest first within a meter
//! ```
//!
//! Resource rows are written into a version bucket equal to the sample's
//! epoch milliseconds, so a late sample never hides newer metadata.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use meterbase_core::{
    config::StorageConfig,
    error::{Error, Result, ResultExt},
    traits::{Connection, ScanRequest, Table},
    types::{Meter, Resource, Sample, SampleFilter, Timestamp},
    value::{Metadata, Value},
};

use crate::entry::{column, deserialize_entry, serialize_entry, ColumnKind, Entry, METER_PREFIX};
use crate::filter::{CompareOp, FilterExpr, Predicate};
use crate::keys::{compose, timestamp, KeyPart};
use crate::query::{
    equalities, make_meter_query_for_resource, make_query, make_sample_query_from_filter,
};
use crate::schema::{create_tables, drop_tables, METER_TABLE, RESOURCE_TABLE};

/// Sample storage over a column-family connection
pub struct MeteringStore {
    conn: Arc<dyn Connection>,
    config: StorageConfig,
}

impl MeteringStore {
    pub fn new(conn: Arc<dyn Connection>, config: StorageConfig) -> Self {
        Self { conn, config }
    }

    fn table(&self, name: &str) -> Result<Arc<dyn Table>> {
        self.conn.table(&self.config.table_name(name))
    }

    /// Create the resource and meter tables
    pub fn upgrade(&self) -> Result<()> {
        create_tables(self.conn.as_ref(), &self.config, &[RESOURCE_TABLE, METER_TABLE])
    }

    /// Drop the resource and meter tables
    pub fn clear(&self) -> Result<()> {
        drop_tables(self.conn.as_ref(), &self.config, &[RESOURCE_TABLE, METER_TABLE])
    }

    /// Write one sample to both tables
    pub fn record_metering_data(&self, sample: &Sample) -> Result<()> {
        let resource_table = self.table(RESOURCE_TABLE)?;
        let meter_table = self.table(METER_TABLE)?;

        let rts = timestamp(&sample.timestamp, true)?;
        let bucket = sample.timestamp.and_utc().timestamp_millis() as u64;
        let record = sample.to_record();

        let resource = Entry::from_record(&record).meter(
            rts,
            &sample.source,
            &sample.counter_name,
            &sample.counter_type,
            &sample.counter_unit,
            sample.timestamp,
        );
        resource_table.put(sample.resource_id.as_bytes(), serialize_entry(&resource), Some(bucket))?;

        let row = compose([
            KeyPart::from(&sample.counter_name),
            KeyPart::from(rts),
            KeyPart::from(&sample.message_id),
        ]);
        let recorded_at = sample
            .recorded_at
            .unwrap_or_else(|| Utc::now().naive_utc());
        let meter = Entry::from_record(&record)
            .with("rts", Value::Int(rts))
            .with("message", Value::Map(record.clone()))
            .with("recorded_at", Value::DateTime(recorded_at));
        meter_table.put(row.as_bytes(), serialize_entry(&meter), None)?;

        debug!(
            "Recorded sample {} for resource {} ({})",
            sample.message_id, sample.resource_id, sample.counter_name
        );
        Ok(())
    }

    /// Resources matching the filter, with first/last sample timestamps
    pub fn get_resources(&self, filter: &SampleFilter, limit: Option<usize>) -> Result<Vec<Resource>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        let eqs = equalities([
            ("user_id", filter.user.clone().map(Value::from)),
            ("project_id", filter.project.clone().map(Value::from)),
            ("resource_id", filter.resource.clone().map(Value::from)),
            ("source", filter.source.clone().map(Value::from)),
        ]);
        let query = make_meter_query_for_resource(
            filter.start_timestamp.as_ref(),
            filter.start_timestamp_op,
            filter.end_timestamp.as_ref(),
            filter.end_timestamp_op,
            filter.source.as_deref(),
            make_query(&eqs, &filter.metaquery),
        )?;
        debug!("Query resource table: {}", render(&query));

        let table = self.table(RESOURCE_TABLE)?;
        let request = ScanRequest::new()
            .filter(query.map(|q| q.to_string()))
            .limit(limit);

        let mut resources = Vec::new();
        for row in table.scan(request)? {
            let (key, cells) = row?;
            let mut decoded = deserialize_entry(&cells, true)?;
            let resource_id = String::from_utf8(key.to_vec())
                .map_err(|_| Error::codec("resource row key is not UTF-8"))?;

            let mut stamps: Vec<Timestamp> = decoded
                .meters
                .iter()
                .filter_map(|(_, ts)| ts.as_datetime())
                .collect();
            stamps.sort();
            let source = decoded.meters.first().and_then(|(parts, _)| parts.get(1).cloned());

            // Qualifier filters strip everything but meters; fetch ids separately
            if decoded.get("project_id").is_none() && decoded.get("user_id").is_none() {
                let columns = [column("project_id"), column("user_id"), column("resource_metadata")];
                let cells = table.row(&key, &columns)?;
                decoded = deserialize_entry(&cells, true)?;
            }

            resources.push(Resource {
                resource_id,
                first_sample_timestamp: stamps.first().copied(),
                last_sample_timestamp: stamps.last().copied(),
                project_id: decoded.get_str("project_id").map(str::to_string),
                user_id: decoded.get_str("user_id").map(str::to_string),
                source,
                metadata: decoded.metadata,
            });
        }
        Ok(resources)
    }

    /// Distinct meters on matching resources. With `unique`, only name,
    /// type and unit identify a meter.
    pub fn get_meters(&self, filter: &SampleFilter, limit: Option<usize>, unique: bool) -> Result<Vec<Meter>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        let eqs = equalities([
            ("user_id", filter.user.clone().map(Value::from)),
            ("project_id", filter.project.clone().map(Value::from)),
            ("resource_id", filter.resource.clone().map(Value::from)),
            ("source", filter.source.clone().map(Value::from)),
        ]);
        let mut query = make_query(&eqs, &filter.metaquery).unwrap_or_default();
        if unique {
            query.push(Predicate::ColumnPrefix {
                prefix: METER_PREFIX.to_string(),
            });
        }
        let query = query.into_option();
        debug!("Query resource table: {}", render(&query));

        let table = self.table(RESOURCE_TABLE)?;
        let request = ScanRequest::new().filter(query.map(|q| q.to_string()));

        let mut seen = HashSet::new();
        let mut meters = Vec::new();
        for row in table.scan(request)? {
            let (_, cells) = row?;
            let decoded = deserialize_entry(&cells, true)?;
            for (parts, _) in &decoded.meters {
                if limit.is_some_and(|limit| meters.len() >= limit) {
                    return Ok(meters);
                }
                let [_, source, name, meter_type, unit] = parts.as_slice() else {
                    return Err(Error::codec(format!("malformed meter qualifier {:?}", parts)));
                };

                let mut meter = Meter {
                    name: name.clone(),
                    meter_type: meter_type.clone(),
                    unit: unit.clone(),
                    resource_id: None,
                    project_id: None,
                    user_id: None,
                    source: None,
                };
                if !unique {
                    meter.resource_id = decoded.get_str("resource_id").map(str::to_string);
                    meter.project_id = decoded.get_str("project_id").map(str::to_string);
                    meter.user_id = decoded.get_str("user_id").map(str::to_string);
                }
                // Identity ignores the source
                if !seen.insert(meter.clone()) {
                    continue;
                }
                if !unique && !source.is_empty() {
                    meter.source = Some(source.clone());
                }
                meters.push(meter);
            }
        }
        Ok(meters)
    }

    /// Samples matching the filter, newest first within a meter
    pub fn get_samples(&self, filter: &SampleFilter, limit: Option<usize>) -> Result<Vec<Sample>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        let query = make_sample_query_from_filter(filter, false)?;
        debug!("Query meter table: {}", render(&query.filter));

        let table = self.table(METER_TABLE)?;
        let request = ScanRequest::new()
            .filter(query.filter.map(|q| q.to_string()))
            .row_start(query.start_row)
            .row_stop(query.end_row)
            .columns(query.columns)
            .limit(limit);

        let mut samples = Vec::new();
        for row in table.scan(request)? {
            let (key, cells) = row?;
            let decoded = deserialize_entry(&cells, false)?;
            let message = decoded
                .get("message")
                .and_then(Value::as_map)
                .ok_or_else(|| Error::codec(format!("meter row {:?} has no message", key)))?;
            let mut sample = Sample::from_record(message)
                .with_context(|| format!("meter row {:?}", key))?;
            sample.recorded_at = decoded.get("recorded_at").and_then(Value::as_datetime);
            samples.push(sample);
        }
        Ok(samples)
    }

    /// Delete samples older than `ttl`
    pub fn clear_expired_metering_data(&self, ttl: Duration) -> Result<usize> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Configuration {
            message: format!("invalid ttl: {}", e),
        })?;
        self.clear_metering_data_before(Utc::now().naive_utc() - ttl)
    }

    /// Delete meter rows and resource meter markers from before `threshold`.
    /// Resource rows left without meters are removed.
    pub fn clear_metering_data_before(&self, threshold: Timestamp) -> Result<usize> {
        let rts_threshold = timestamp(&threshold, true)?;

        let meter_table = self.table(METER_TABLE)?;
        let expired = FilterExpr::new().and(Predicate::column_compare(
            "rts",
            CompareOp::Gt,
            rts_threshold.to_string(),
            Some(true),
        ));
        let request = ScanRequest::new()
            .filter(Some(expired.to_string()))
            .columns([column("rts")]);
        let mut removed = 0;
        for row in meter_table.scan(request)? {
            let (key, _) = row?;
            meter_table.delete(&key, None)?;
            removed += 1;
        }

        let resource_table = self.table(RESOURCE_TABLE)?;
        let meters_only = FilterExpr::new().and(Predicate::ColumnPrefix {
            prefix: METER_PREFIX.to_string(),
        });
        let request = ScanRequest::new().filter(Some(meters_only.to_string()));
        for row in resource_table.scan(request)? {
            let (key, cells) = row?;
            let mut stale = Vec::new();
            for col in cells.keys() {
                if let ColumnKind::Meter(parts) = ColumnKind::parse(col)? {
                    let expired = parts
                        .first()
                        .and_then(|rts| rts.parse::<i64>().ok())
                        .is_some_and(|rts| rts > rts_threshold);
                    if expired {
                        stale.push(col.clone());
                    }
                }
            }

            if stale.len() == cells.len() {
                resource_table.delete(&key, None)?;
            } else if !stale.is_empty() {
                resource_table.delete(&key, Some(stale.as_slice()))?;
            }
        }

        info!("Cleared {} expired samples older than {}", removed, threshold);
        Ok(removed)
    }

    /// Row counts per table, for diagnostics
    pub fn stats(&self) -> Result<Metadata> {
        let mut stats = Metadata::new();
        for name in [RESOURCE_TABLE, METER_TABLE] {
            let rows = self.table(name)?.scan(ScanRequest::new())?.count();
            stats.insert(name.to_string(), Value::Int(rows as i64));
        }
        Ok(stats)
    }
}

fn render(query: &Option<FilterExpr>) -> String {
    query
        .as_ref()
        .map(|q| q.to_string())
        .unwrap_or_else(|| "none".to_string())
}

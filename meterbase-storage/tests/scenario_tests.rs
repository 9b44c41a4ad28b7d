//! # Codec and Emulator Scenarios
//!
//! End-to-end checks of the wire format: row keys, compiled filter text,
//! cell layout, and the emulator's scan semantics.

use bytes::Bytes;
use chrono::NaiveDate;
use proptest::prelude::*;

use meterbase_core::{
    traits::{Cells, ColumnFamily, Connection, ScanRequest},
    types::{SampleFilter, Timestamp, TimestampOp},
    value::{Metadata, Value},
};
use meterbase_storage::{
    entry::{deserialize_entry, serialize_entry, Entry},
    keys::{compose, timestamp, KeyPart},
    query::{equalities, make_query, make_sample_query_from_filter},
    MemoryConnection,
};

fn cells(cols: &[(&str, &str)]) -> Cells {
    cols.iter()
        .map(|(c, v)| (c.to_string(), Bytes::copy_from_slice(v.as_bytes())))
        .collect()
}

fn connection_with_table(name: &str) -> MemoryConnection {
    let conn = MemoryConnection::new();
    conn.create_table(name, &[ColumnFamily::new("f")]).unwrap();
    conn
}

fn new_year() -> Timestamp {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

#[test]
fn test_alarm_history_row_key() {
    let micros = 1_704_067_200_000_000i64;
    let rts = timestamp(&new_year(), true).unwrap();
    assert_eq!(rts, i64::MAX - micros);

    let key = compose([KeyPart::from("a1"), KeyPart::from(rts)]);
    assert_eq!(key, format!("a1:{}", i64::MAX - micros));
    assert_eq!(key, "a1:9221667969654775807");
}

#[test]
fn test_make_query_text() {
    let eqs = equalities([
        ("user_id", Some(Value::from("u1"))),
        ("source", Some(Value::from("src1"))),
    ]);
    let query = make_query(&eqs, &Metadata::new()).unwrap();
    assert_eq!(
        query.to_string(),
        "SingleColumnValueFilter ('f', 'user_id', =, 'binary:\"u1\"', true, true) AND \
         SingleColumnValueFilter ('f', 's_src1', =, 'binary:\"1\"', true, true)"
    );
}

#[test]
fn test_emulator_put_merges() {
    let conn = connection_with_table("t");
    let table = conn.table("t").unwrap();
    table.put(b"r1", cells(&[("f:a", "1")]), None).unwrap();
    table.put(b"r1", cells(&[("f:b", "2")]), None).unwrap();
    assert_eq!(table.row(b"r1", &[]).unwrap(), cells(&[("f:a", "1"), ("f:b", "2")]));
}

#[test]
fn test_column_prefix_filter_scan() {
    let conn = connection_with_table("t");
    let table = conn.table("t").unwrap();
    table.put(b"r", cells(&[("f:m_cpu", "1"), ("f:s_src1", "1")]), None).unwrap();

    let rows: Vec<_> = table
        .scan(ScanRequest::new().filter(Some("ColumnPrefixFilter ('m_')")))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, cells(&[("f:m_cpu", "1")]));
}

#[test]
fn test_scan_row_range() {
    let conn = connection_with_table("t");
    let table = conn.table("t").unwrap();
    for key in ["z", "k", "c", "a"] {
        table.put(key.as_bytes(), cells(&[("f:v", "1")]), None).unwrap();
    }
    let keys: Vec<_> = table
        .scan(ScanRequest::new().row_start(Some("b")).row_stop(Some("m")))
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(keys, vec![Bytes::from("c"), Bytes::from("k")]);
}

#[test]
fn test_binary_metadata_omitted_from_flattened_view() {
    let mut metadata = Metadata::new();
    metadata.insert("blob".into(), Value::Bytes(vec![0, 159, 146, 150]));
    metadata.insert("name".into(), Value::from("vm1"));

    let stored = serialize_entry(&Entry::new().metadata(metadata.clone()));
    assert!(stored.contains_key("f:r_metadata.name"));
    assert!(!stored.contains_key("f:r_metadata.blob"));

    let flattened = deserialize_entry(&stored, false).unwrap();
    assert_eq!(flattened.metadata.len(), 1);
    assert_eq!(flattened.metadata.get("name"), Some(&Value::from("vm1")));

    let raw = deserialize_entry(&stored, true).unwrap();
    assert_eq!(raw.metadata, metadata);
}

#[test]
fn test_newest_rows_scan_first() {
    let conn = connection_with_table("alarm_h");
    let table = conn.table("alarm_h").unwrap();
    let old = new_year();
    let recent = old + chrono::Duration::days(30);
    for ts in [old, recent] {
        let key = compose([KeyPart::from("a1"), KeyPart::from(timestamp(&ts, true).unwrap())]);
        table.put(key.as_bytes(), cells(&[("f:v", "1")]), None).unwrap();
    }

    let first = table.scan(ScanRequest::new()).unwrap().next().unwrap().unwrap().0;
    let expected = compose([KeyPart::from("a1"), KeyPart::from(timestamp(&recent, true).unwrap())]);
    assert_eq!(first, Bytes::from(expected));
}

fn id_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-z0-9:%_-]{1,8}")
}

fn op_strategy() -> impl Strategy<Value = Option<TimestampOp>> {
    prop::option::of(prop::sample::select(TimestampOp::ALL.to_vec()))
}

mod property_tests {
    use super::*;

    proptest! {
        #[test]
        fn test_projection_covers_filtered_columns(
            user in id_strategy(),
            project in id_strategy(),
            resource in id_strategy(),
            meter in id_strategy(),
            source in id_strategy(),
            message_id in id_strategy(),
            start_days in prop::option::of(0i64..500),
            start_op in op_strategy(),
            end_days in prop::option::of(0i64..500),
            end_op in op_strategy(),
            meta_keys in prop::collection::btree_set("[a-z]{1,6}(\\.[a-z]{1,6})?", 0..3),
        ) {
            let filter = SampleFilter {
                user,
                project,
                resource,
                meter,
                source,
                message_id,
                start_timestamp: start_days.map(|d| new_year() + chrono::Duration::days(d)),
                start_timestamp_op: start_op,
                end_timestamp: end_days.map(|d| new_year() + chrono::Duration::days(d)),
                end_timestamp_op: end_op,
                metaquery: meta_keys
                    .into_iter()
                    .map(|k| (format!("metadata.{}", k), Value::from("x")))
                    .collect(),
            };

            let query = make_sample_query_from_filter(&filter, false).unwrap();
            if let Some(expr) = &query.filter {
                for col in expr.referenced_columns() {
                    prop_assert!(query.columns.contains(&col), "{} missing from {:?}", col, query.columns);
                }
            }
        }
    }
}

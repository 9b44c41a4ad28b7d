//! # Entry Serializer
//!
//! Converts a logical record into the flat `family:qualifier -> cell` map a
//! row stores, and back. Qualifiers carry their meaning in a prefix:
//!
//! ```text
//! f:s_<source>              source marker, JSON "1"
//! f:m_<rts:src:name:type:unit>  meter marker, value = sample timestamp
//! f:r_metadata.<path>       one flattened metadata leaf
//! f:resource_metadata       raw metadata blob
//! f:<name>                  any other field, JSON value
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::NaiveDateTime;
use tracing::warn;

use meterbase_core::error::{Error, Result, ResultExt};
use meterbase_core::traits::Cells;
use meterbase_core::value::{Metadata, Value};

use crate::keys::{compose, decompose, quote_qualifier, unquote, KeyPart};

/// Column family every table uses
pub const FAMILY: &str = "f";

pub const SOURCE_PREFIX: &str = "s_";
pub const METER_PREFIX: &str = "m_";
pub const METADATA_PREFIX: &str = "r_metadata.";
pub const RAW_METADATA: &str = "resource_metadata";

/// Value stored under marker columns (the JSON string `"1"`)
pub const MARKER_VALUE: &str = r#""1""#;

/// Full column name for a qualifier in [`FAMILY`]
pub fn column(qualifier: &str) -> String {
    format!("{}:{}", FAMILY, qualifier)
}

/// Name of a scalar field as decoded from its qualifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    Simple(String),
    /// Qualifier held a composite of several fields
    Compound(Vec<String>),
}

impl FieldKey {
    pub fn as_simple(&self) -> Option<&str> {
        match self {
            FieldKey::Simple(s) => Some(s),
            FieldKey::Compound(_) => None,
        }
    }
}

/// What a column holds, derived from its qualifier alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Source(String),
    Meter(Vec<String>),
    MetadataLeaf(String),
    Scalar(FieldKey),
}

impl ColumnKind {
    pub fn parse(column: &str) -> Result<Self> {
        let (_, qualifier) = column
            .split_once(':')
            .ok_or_else(|| Error::codec(format!("column '{}' has no family", column)))?;

        if let Some(source) = qualifier.strip_prefix(SOURCE_PREFIX) {
            return Ok(ColumnKind::Source(source.to_string()));
        }
        if let Some(meter) = qualifier.strip_prefix(METER_PREFIX) {
            return decompose(meter)
                .map(ColumnKind::Meter)
                .with_context(|| format!("meter column '{}'", column));
        }
        if let Some(path) = qualifier.strip_prefix(METADATA_PREFIX) {
            return Ok(ColumnKind::MetadataLeaf(path.to_string()));
        }

        let key = if qualifier.contains(':') {
            FieldKey::Compound(decompose(qualifier)?)
        } else {
            FieldKey::Simple(unquote(qualifier)?)
        };
        Ok(ColumnKind::Scalar(key))
    }
}

/// A record about to be written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub fields: BTreeMap<String, Value>,
    pub source: Option<String>,
    /// Composite meter qualifier (without prefix) to sample timestamp
    pub meters: BTreeMap<String, NaiveDateTime>,
    pub resource_metadata: Option<Metadata>,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch every logical field of a record
    pub fn from_record(record: &Metadata) -> Self {
        record
            .iter()
            .fold(Self::new(), |entry, (k, v)| entry.with(k, v.clone()))
    }

    /// Add one logical field, routed by name
    pub fn with(mut self, name: &str, value: Value) -> Self {
        match (name, value) {
            ("source", Value::Str(source)) => self.source = Some(source),
            (RAW_METADATA, Value::Map(meta)) => self.resource_metadata = Some(meta),
            ("meter", Value::Map(meters)) => {
                for (qualifier, ts) in meters {
                    if let Value::DateTime(ts) = ts {
                        self.meters.insert(qualifier, ts);
                    }
                }
            }
            (name, value) => {
                self.fields.insert(name.to_string(), value);
            }
        }
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add a meter marker for `(rts, source, name, type, unit)`
    pub fn meter(
        mut self,
        rts: i64,
        source: &str,
        name: &str,
        meter_type: &str,
        unit: &str,
        timestamp: NaiveDateTime,
    ) -> Self {
        let qualifier = compose([
            KeyPart::from(rts),
            KeyPart::from(source),
            KeyPart::from(name),
            KeyPart::from(meter_type),
            KeyPart::from(unit),
        ]);
        self.meters.insert(qualifier, timestamp);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.resource_metadata = Some(metadata);
        self
    }
}

/// Encode an entry into cells
pub fn serialize_entry(entry: &Entry) -> Cells {
    let mut cells = Cells::new();

    if let Some(source) = &entry.source {
        cells.insert(
            column(&format!("{}{}", SOURCE_PREFIX, source)),
            Bytes::from_static(MARKER_VALUE.as_bytes()),
        );
    }

    for (qualifier, ts) in &entry.meters {
        cells.insert(
            column(&format!("{}{}", METER_PREFIX, qualifier)),
            Bytes::from(Value::DateTime(*ts).to_json()),
        );
    }

    if let Some(meta) = &entry.resource_metadata {
        for (path, leaf) in flatten_metadata(meta) {
            cells.insert(
                column(&format!("{}{}", METADATA_PREFIX, path)),
                Bytes::from(leaf.to_json()),
            );
        }
        cells.insert(
            column(RAW_METADATA),
            Bytes::from(Value::Map(meta.clone()).to_json()),
        );
    }

    for (name, value) in &entry.fields {
        cells.insert(column(&quote_qualifier(name)), Bytes::from(value.to_json()));
    }

    cells
}

/// A decoded row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedEntry {
    pub fields: BTreeMap<FieldKey, Value>,
    pub sources: Vec<String>,
    /// Decomposed meter qualifier with its stored timestamp
    pub meters: Vec<(Vec<String>, Value)>,
    pub metadata: Metadata,
}

impl DecodedEntry {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(&FieldKey::Simple(name.to_string()))
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Simple fields as a record, with metadata under `resource_metadata`
    pub fn record(&self) -> Metadata {
        let mut record: Metadata = self
            .fields
            .iter()
            .filter_map(|(k, v)| k.as_simple().map(|k| (k.to_string(), v.clone())))
            .collect();
        if !self.metadata.is_empty() || record.contains_key(RAW_METADATA) {
            record.insert(RAW_METADATA.to_string(), Value::Map(self.metadata.clone()));
        }
        record
    }
}

/// Decode cells back into fields, sources, meters and metadata.
///
/// With `prefer_raw_metadata` the metadata comes from the raw blob;
/// otherwise it is the flattened `path -> leaf` view.
pub fn deserialize_entry(cells: &Cells, prefer_raw_metadata: bool) -> Result<DecodedEntry> {
    let mut decoded = DecodedEntry::default();
    let mut flattened = Metadata::new();

    for (col, cell) in cells {
        match ColumnKind::parse(col)? {
            ColumnKind::Source(source) => decoded.sources.push(source),
            ColumnKind::Meter(parts) => {
                let ts = Value::from_cell(cell).with_context(|| format!("column '{}'", col))?;
                decoded.meters.push((parts, ts));
            }
            ColumnKind::MetadataLeaf(path) => {
                let leaf = Value::from_cell(cell).with_context(|| format!("column '{}'", col))?;
                flattened.insert(path, leaf);
            }
            ColumnKind::Scalar(key) => {
                let value = Value::from_cell(cell).with_context(|| format!("column '{}'", col))?;
                decoded.fields.insert(key, value);
            }
        }
    }

    decoded.metadata = if prefer_raw_metadata {
        decoded
            .get(RAW_METADATA)
            .and_then(Value::as_map)
            .cloned()
            .unwrap_or_default()
    } else {
        flattened
    };
    Ok(decoded)
}

/// Flatten nested metadata into `a.b` / `list[0].c` paths.
///
/// Null leaves are kept and stored as `null`. Binary leaves are skipped
/// with a warning; empty maps and empty lists produce no leaves.
pub fn flatten_metadata(metadata: &Metadata) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (k, v) in metadata {
        flatten_into(k.clone(), v, &mut out);
    }
    out
}

fn flatten_into(path: String, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Map(map) => {
            for (k, v) in map {
                flatten_into(format!("{}.{}", path, k), v, out);
            }
        }
        Value::List(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(format!("{}[{}]", path, i), v, out);
            }
        }
        Value::Bytes(_) => {
            let err = Error::UnsupportedMetadataType {
                key: path,
                type_name: value.type_name(),
            };
            warn!("Dropping metadata leaf from flattened view: {}", err);
        }
        leaf => out.push((path, leaf.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    fn nested_metadata() -> Metadata {
        let mut disk = Metadata::new();
        disk.insert("size".into(), Value::Int(20));
        let mut meta = Metadata::new();
        meta.insert("display_name".into(), Value::from("web-1"));
        meta.insert("flavor".into(), Value::Map(disk.clone()));
        meta.insert(
            "disks".into(),
            Value::List(vec![Value::Map(disk), Value::from("swap")]),
        );
        meta
    }

    #[test]
    fn test_column_kind_dispatch() {
        assert_eq!(
            ColumnKind::parse("f:s_openstack").unwrap(),
            ColumnKind::Source("openstack".into())
        );
        assert_eq!(
            ColumnKind::parse("f:m_12:src:cpu:cumulative:ns").unwrap(),
            ColumnKind::Meter(vec!["12".into(), "src".into(), "cpu".into(), "cumulative".into(), "ns".into()])
        );
        assert_eq!(
            ColumnKind::parse("f:r_metadata.flavor.size").unwrap(),
            ColumnKind::MetadataLeaf("flavor.size".into())
        );
        assert_eq!(
            ColumnKind::parse("f:message").unwrap(),
            ColumnKind::Scalar(FieldKey::Simple("message".into()))
        );
        assert_eq!(
            ColumnKind::parse("f:a%3Ab:c").unwrap(),
            ColumnKind::Scalar(FieldKey::Compound(vec!["a:b".into(), "c".into()]))
        );
        assert!(ColumnKind::parse("noseparator").is_err());
    }

    #[test]
    fn test_flatten_paths() {
        let flat: BTreeMap<_, _> = flatten_metadata(&nested_metadata()).into_iter().collect();
        assert_eq!(flat.get("display_name"), Some(&Value::from("web-1")));
        assert_eq!(flat.get("flavor.size"), Some(&Value::Int(20)));
        assert_eq!(flat.get("disks[0].size"), Some(&Value::Int(20)));
        assert_eq!(flat.get("disks[1]"), Some(&Value::from("swap")));
        assert_eq!(flat.len(), 4);
    }

    #[test]
    fn test_serialize_resource_row() {
        let entry = Entry::new()
            .source("openstack")
            .meter(9, "openstack", "cpu", "cumulative", "ns", ts())
            .metadata(nested_metadata())
            .with("user_id", Value::from("u1"));
        let cells = serialize_entry(&entry);

        assert_eq!(cells.get("f:s_openstack"), Some(&Bytes::from_static(br#""1""#)));
        assert_eq!(
            cells.get("f:m_9:openstack:cpu:cumulative:ns"),
            Some(&Bytes::from(r#"{"$date":"2024-02-01T08:00:00.000000Z"}"#))
        );
        assert_eq!(cells.get("f:r_metadata.flavor.size"), Some(&Bytes::from("20")));
        assert_eq!(cells.get("f:user_id"), Some(&Bytes::from(r#""u1""#)));
        assert!(cells.contains_key("f:resource_metadata"));
    }

    #[test]
    fn test_binary_metadata_only_in_raw_blob() {
        let mut meta = Metadata::new();
        meta.insert("blob".into(), Value::Bytes(vec![1, 2, 3]));
        meta.insert("name".into(), Value::from("x"));
        let cells = serialize_entry(&Entry::new().metadata(meta.clone()));

        assert!(!cells.contains_key("f:r_metadata.blob"));
        assert!(cells.contains_key("f:r_metadata.name"));

        let raw = deserialize_entry(&cells, true).unwrap();
        assert_eq!(raw.metadata, meta);
        let flat = deserialize_entry(&cells, false).unwrap();
        assert_eq!(flat.metadata.len(), 1);
        assert_eq!(flat.metadata.get("name"), Some(&Value::from("x")));
    }

    #[test]
    fn test_record_roundtrip_on_raw_branch() {
        let mut record = Metadata::new();
        record.insert("source".into(), Value::from("openstack"));
        record.insert("counter_volume".into(), Value::Float(1.5));
        record.insert("timestamp".into(), Value::DateTime(ts()));
        record.insert("user_id".into(), Value::Null);
        record.insert("resource_metadata".into(), Value::Map(nested_metadata()));

        let cells = serialize_entry(&Entry::from_record(&record));
        let decoded = deserialize_entry(&cells, true).unwrap();
        assert_eq!(decoded.sources, vec!["openstack".to_string()]);

        let mut back = decoded.record();
        back.insert("source".into(), Value::from(decoded.sources[0].as_str()));
        assert_eq!(back, record);
    }

    #[test]
    fn test_null_metadata_is_flattened() {
        let mut meta = Metadata::new();
        meta.insert("a".into(), Value::Null);
        meta.insert("b".into(), Value::from("x"));
        let cells = serialize_entry(&Entry::new().metadata(meta.clone()));
        assert_eq!(cells.get("f:r_metadata.a"), Some(&Bytes::from_static(b"null")));

        let flat = deserialize_entry(&cells, false).unwrap();
        let raw = deserialize_entry(&cells, true).unwrap();
        assert_eq!(flat.metadata, raw.metadata);
        assert_eq!(flat.metadata.get("a"), Some(&Value::Null));
    }

    #[test]
    fn test_compound_field_names() {
        let entry = Entry::new().with("a:b", Value::Int(1));
        let cells = serialize_entry(&entry);
        assert!(cells.contains_key("f:a:b"));
        let decoded = deserialize_entry(&cells, true).unwrap();
        assert_eq!(
            decoded.fields.get(&FieldKey::Compound(vec!["a".into(), "b".into()])),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn test_corrupt_cell_is_codec_error() {
        let mut cells = Cells::new();
        cells.insert("f:user_id".into(), Bytes::from_static(b"{oops"));
        let err = deserialize_entry(&cells, true).unwrap_err();
        assert_eq!(err.error_code(), "CODEC_ERROR");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1_000_000i32..1_000_000).prop_map(|i| Value::Float(i as f64 / 4.0)),
            "[a-zA-Z0-9 :%._-]{0,16}".prop_map(Value::Str),
            (0i64..4_000_000_000_000_000).prop_map(|micros| {
                Value::DateTime(
                    DateTime::from_timestamp_micros(micros)
                        .unwrap()
                        .naive_utc(),
                )
            }),
        ]
    }

    fn with_bytes() -> impl Strategy<Value = Value> {
        prop_oneof![
            4 => leaf(),
            1 => prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
        ]
    }

    fn metadata(leaves: impl Strategy<Value = Value> + 'static) -> impl Strategy<Value = Metadata> {
        let value = leaves.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
            ]
        });
        prop::collection::btree_map("[a-z]{1,6}", value, 0..5)
    }

    proptest! {
        #[test]
        fn test_record_roundtrip_raw_view(
            meta in metadata(with_bytes()),
            user in prop::option::of("[a-z0-9-]{1,12}"),
            volume in (-1_000_000i32..1_000_000).prop_map(|i| i as f64 / 4.0),
        ) {
            let mut record = Metadata::new();
            record.insert("user_id".into(), user.map_or(Value::Null, Value::Str));
            record.insert("counter_volume".into(), Value::Float(volume));
            record.insert(RAW_METADATA.into(), Value::Map(meta));

            let cells = serialize_entry(&Entry::from_record(&record));
            let decoded = deserialize_entry(&cells, true).unwrap();
            prop_assert_eq!(decoded.record(), record);
        }

        #[test]
        fn test_flattened_view_matches_flatten(meta in metadata(leaf())) {
            let cells = serialize_entry(&Entry::new().metadata(meta.clone()));
            let decoded = deserialize_entry(&cells, false).unwrap();
            let expected: Metadata = flatten_metadata(&meta).into_iter().collect();
            prop_assert_eq!(decoded.metadata, expected);
        }
    }
}

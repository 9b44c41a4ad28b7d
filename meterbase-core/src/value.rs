//! # Cell Values
//!
//! Every cell written by meterbase holds JSON text. Plain JSON cannot carry
//! dates or binary blobs, so those are written as single-key marker objects
//! in the extended-JSON style:
//!
//! ```text
//! DateTime  ->  {"$date": "2024-01-01T00:00:00.000000Z"}
//! Bytes     ->  {"$binary": "<base64>", "$type": "00"}
//! ```
//!
//! Decoding recognizes both markers (and the legacy integer-millisecond form
//! of `$date`) and strips any timezone, returning naive UTC datetimes.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Number};

use crate::error::{Error, Result};

/// Ordered mapping used for records and resource metadata
pub type Metadata = BTreeMap<String, Value>;

const DATE_MARKER: &str = "$date";
const BINARY_MARKER: &str = "$binary";
const BINARY_TYPE: &str = "$type";
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// JSON-like value with first-class dates and binary blobs
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Metadata),
}

impl Value {
    /// Name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Metadata> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Build a list from anything convertible
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode to JSON text (the on-disk cell format)
    pub fn to_json(&self) -> String {
        self.to_json_value().to_string()
    }

    /// Decode from JSON text written by [`Value::to_json`]
    pub fn from_json(text: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        Self::from_json_value(json)
    }

    /// Decode a raw cell
    pub fn from_cell(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::codec(format!("cell is not UTF-8: {}", e)))?;
        Self::from_json(text)
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number(Number::from(*i)),
            // Non-finite floats have no JSON form.
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                let mut marker = Map::new();
                marker.insert(
                    DATE_MARKER.to_string(),
                    serde_json::Value::String(dt.format(DATE_FORMAT).to_string()),
                );
                serde_json::Value::Object(marker)
            }
            Value::Bytes(b) => {
                let mut marker = Map::new();
                marker.insert(BINARY_MARKER.to_string(), serde_json::Value::String(BASE64.encode(b)));
                marker.insert(BINARY_TYPE.to_string(), serde_json::Value::String("00".to_string()));
                serde_json::Value::Object(marker)
            }
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json_value).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json_value()))
                    .collect(),
            ),
        }
    }

    pub fn from_json_value(json: serde_json::Value) -> Result<Self> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    return Err(Error::codec(format!("unrepresentable number {}", n)));
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::from_json_value)
                    .collect::<Result<_>>()?,
            ),
            serde_json::Value::Object(obj) => object_hook(obj)?,
        })
    }
}

/// Turns marker objects back into dates and blobs
fn object_hook(mut obj: Map<String, serde_json::Value>) -> Result<Value> {
    if obj.len() == 1 && obj.contains_key(DATE_MARKER) {
        return match obj.remove(DATE_MARKER) {
            Some(serde_json::Value::String(s)) => parse_date(&s).map(Value::DateTime),
            Some(serde_json::Value::Number(n)) => {
                let millis = n
                    .as_i64()
                    .ok_or_else(|| Error::codec(format!("invalid $date millis {}", n)))?;
                DateTime::from_timestamp_millis(millis)
                    .map(|dt| Value::DateTime(dt.naive_utc()))
                    .ok_or_else(|| Error::codec(format!("$date out of range: {}", millis)))
            }
            other => Err(Error::codec(format!("invalid $date marker: {:?}", other))),
        };
    }

    if obj.contains_key(BINARY_MARKER) && obj.len() <= 2 {
        return match obj.remove(BINARY_MARKER) {
            Some(serde_json::Value::String(s)) => BASE64
                .decode(s.as_bytes())
                .map(Value::Bytes)
                .map_err(|e| Error::codec(format!("invalid $binary payload: {}", e))),
            other => Err(Error::codec(format!("invalid $binary marker: {:?}", other))),
        };
    }

    let mut map = Metadata::new();
    for (k, v) in obj {
        map.insert(k, Value::from_json_value(v)?);
    }
    Ok(Value::Map(map))
}

fn parse_date(s: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| Error::codec(format!("invalid $date '{}': {}", s, e)))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Metadata> for Value {
    fn from(m: Metadata) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

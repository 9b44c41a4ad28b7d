//! # Core Types
//!
//! Records persisted by the metering and alarm stores, plus the structured
//! filters callers hand to the query compiler.
//!
//! Every persisted record converts to and from a flat [`Metadata`] map of
//! logical field name to [`Value`]. The entry serializer dispatches on those
//! field names, so the names here are part of the storage format.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::value::{Metadata, Value};

/// Timestamp type used throughout the system (naive UTC)
pub type Timestamp = NaiveDateTime;

/// Comparison operator on a timestamp bound, as callers express it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampOp {
    Eq,
    Lt,
    Le,
    Ne,
    Gt,
    Ge,
}

impl TimestampOp {
    pub const ALL: [TimestampOp; 6] = [
        TimestampOp::Eq,
        TimestampOp::Lt,
        TimestampOp::Le,
        TimestampOp::Ne,
        TimestampOp::Gt,
        TimestampOp::Ge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampOp::Eq => "eq",
            TimestampOp::Lt => "lt",
            TimestampOp::Le => "le",
            TimestampOp::Ne => "ne",
            TimestampOp::Gt => "gt",
            TimestampOp::Ge => "ge",
        }
    }

    /// Evaluate the operator on plain values
    pub fn holds<T: PartialOrd>(&self, lhs: T, rhs: T) -> bool {
        match self {
            TimestampOp::Eq => lhs == rhs,
            TimestampOp::Lt => lhs < rhs,
            TimestampOp::Le => lhs <= rhs,
            TimestampOp::Ne => lhs != rhs,
            TimestampOp::Gt => lhs > rhs,
            TimestampOp::Ge => lhs >= rhs,
        }
    }
}

impl FromStr for TimestampOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TimestampOp::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| Error::unsupported_operator("timestamp bound", s))
    }
}

impl fmt::Display for TimestampOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metering sample as produced by the polling pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub source: String,
    pub counter_name: String,
    pub counter_type: String,
    pub counter_unit: String,
    pub counter_volume: f64,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub resource_id: String,
    pub timestamp: Timestamp,
    pub resource_metadata: Metadata,
    pub message_id: String,
    pub message_signature: Option<String>,
    pub recorded_at: Option<Timestamp>,
}

impl Sample {
    /// Logical record; `recorded_at` is stored on its own column, not here
    pub fn to_record(&self) -> Metadata {
        let mut r = Metadata::new();
        r.insert("source".into(), Value::from(self.source.as_str()));
        r.insert("counter_name".into(), Value::from(self.counter_name.as_str()));
        r.insert("counter_type".into(), Value::from(self.counter_type.as_str()));
        r.insert("counter_unit".into(), Value::from(self.counter_unit.as_str()));
        r.insert("counter_volume".into(), Value::Float(self.counter_volume));
        r.insert("user_id".into(), Value::from(self.user_id.clone()));
        r.insert("project_id".into(), Value::from(self.project_id.clone()));
        r.insert("resource_id".into(), Value::from(self.resource_id.as_str()));
        r.insert("timestamp".into(), Value::DateTime(self.timestamp));
        r.insert("resource_metadata".into(), Value::Map(self.resource_metadata.clone()));
        r.insert("message_id".into(), Value::from(self.message_id.as_str()));
        r.insert("message_signature".into(), Value::from(self.message_signature.clone()));
        r
    }

    pub fn from_record(r: &Metadata) -> Result<Self> {
        Ok(Self {
            source: required_str(r, "source")?,
            counter_name: required_str(r, "counter_name")?,
            counter_type: required_str(r, "counter_type")?,
            counter_unit: required_str(r, "counter_unit")?,
            counter_volume: r
                .get("counter_volume")
                .and_then(Value::as_f64)
                .ok_or_else(|| missing("counter_volume"))?,
            user_id: optional_str(r, "user_id"),
            project_id: optional_str(r, "project_id"),
            resource_id: required_str(r, "resource_id")?,
            timestamp: required_ts(r, "timestamp")?,
            resource_metadata: optional_map(r, "resource_metadata"),
            message_id: required_str(r, "message_id")?,
            message_signature: optional_str(r, "message_signature"),
            recorded_at: optional_ts(r, "recorded_at"),
        })
    }
}

/// A metered resource, summarized across its samples
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_id: String,
    pub first_sample_timestamp: Option<Timestamp>,
    pub last_sample_timestamp: Option<Timestamp>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub source: Option<String>,
    pub metadata: Metadata,
}

/// A meter observed on a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Meter {
    pub name: String,
    pub meter_type: String,
    pub unit: String,
    pub resource_id: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub source: Option<String>,
}

/// Alarm definition
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub alarm_id: String,
    pub name: String,
    pub alarm_type: String,
    pub enabled: bool,
    pub description: String,
    pub timestamp: Timestamp,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub state: String,
    pub state_timestamp: Timestamp,
    pub severity: Option<String>,
    pub ok_actions: Vec<String>,
    pub alarm_actions: Vec<String>,
    pub insufficient_data_actions: Vec<String>,
    pub repeat_actions: bool,
    pub rule: Metadata,
    pub time_constraints: Vec<Value>,
}

impl Alarm {
    pub fn to_record(&self) -> Metadata {
        let mut r = Metadata::new();
        r.insert("alarm_id".into(), Value::from(self.alarm_id.as_str()));
        r.insert("name".into(), Value::from(self.name.as_str()));
        r.insert("type".into(), Value::from(self.alarm_type.as_str()));
        r.insert("enabled".into(), Value::Bool(self.enabled));
        r.insert("description".into(), Value::from(self.description.as_str()));
        r.insert("timestamp".into(), Value::DateTime(self.timestamp));
        r.insert("user_id".into(), Value::from(self.user_id.clone()));
        r.insert("project_id".into(), Value::from(self.project_id.clone()));
        r.insert("state".into(), Value::from(self.state.as_str()));
        r.insert("state_timestamp".into(), Value::DateTime(self.state_timestamp));
        r.insert("severity".into(), Value::from(self.severity.clone()));
        r.insert("ok_actions".into(), Value::list(self.ok_actions.iter().cloned()));
        r.insert("alarm_actions".into(), Value::list(self.alarm_actions.iter().cloned()));
        r.insert(
            "insufficient_data_actions".into(),
            Value::list(self.insufficient_data_actions.iter().cloned()),
        );
        r.insert("repeat_actions".into(), Value::Bool(self.repeat_actions));
        r.insert("rule".into(), Value::Map(self.rule.clone()));
        r.insert("time_constraints".into(), Value::List(self.time_constraints.clone()));
        r
    }

    pub fn from_record(r: &Metadata) -> Result<Self> {
        Ok(Self {
            alarm_id: required_str(r, "alarm_id")?,
            name: required_str(r, "name")?,
            alarm_type: required_str(r, "type")?,
            enabled: r.get("enabled").and_then(Value::as_bool).unwrap_or(true),
            description: optional_str(r, "description").unwrap_or_default(),
            timestamp: required_ts(r, "timestamp")?,
            user_id: optional_str(r, "user_id"),
            project_id: optional_str(r, "project_id"),
            state: required_str(r, "state")?,
            state_timestamp: required_ts(r, "state_timestamp")?,
            severity: optional_str(r, "severity"),
            ok_actions: string_list(r, "ok_actions"),
            alarm_actions: string_list(r, "alarm_actions"),
            insufficient_data_actions: string_list(r, "insufficient_data_actions"),
            repeat_actions: r.get("repeat_actions").and_then(Value::as_bool).unwrap_or(false),
            rule: optional_map(r, "rule"),
            time_constraints: r
                .get("time_constraints")
                .and_then(Value::as_list)
                .map(<[Value]>::to_vec)
                .unwrap_or_default(),
        })
    }
}

/// Kind of alarm history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmChangeType {
    Creation,
    RuleChange,
    StateTransition,
    Deletion,
}

impl AlarmChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmChangeType::Creation => "creation",
            AlarmChangeType::RuleChange => "rule change",
            AlarmChangeType::StateTransition => "state transition",
            AlarmChangeType::Deletion => "deletion",
        }
    }
}

impl FromStr for AlarmChangeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "creation" => Ok(AlarmChangeType::Creation),
            "rule change" => Ok(AlarmChangeType::RuleChange),
            "state transition" => Ok(AlarmChangeType::StateTransition),
            "deletion" => Ok(AlarmChangeType::Deletion),
            other => Err(Error::codec(format!("unknown alarm change type '{}'", other))),
        }
    }
}

/// One entry of alarm history
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmChange {
    pub event_id: String,
    pub alarm_id: String,
    pub change_type: AlarmChangeType,
    pub detail: String,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub on_behalf_of: Option<String>,
    pub timestamp: Timestamp,
    pub severity: Option<String>,
}

impl AlarmChange {
    pub fn new(alarm_id: impl Into<String>, change_type: AlarmChangeType, timestamp: Timestamp) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            alarm_id: alarm_id.into(),
            change_type,
            detail: String::new(),
            user_id: None,
            project_id: None,
            on_behalf_of: None,
            timestamp,
            severity: None,
        }
    }

    pub fn to_record(&self) -> Metadata {
        let mut r = Metadata::new();
        r.insert("event_id".into(), Value::from(self.event_id.as_str()));
        r.insert("alarm_id".into(), Value::from(self.alarm_id.as_str()));
        r.insert("type".into(), Value::from(self.change_type.as_str()));
        r.insert("detail".into(), Value::from(self.detail.as_str()));
        r.insert("user_id".into(), Value::from(self.user_id.clone()));
        r.insert("project_id".into(), Value::from(self.project_id.clone()));
        r.insert("on_behalf_of".into(), Value::from(self.on_behalf_of.clone()));
        r.insert("timestamp".into(), Value::DateTime(self.timestamp));
        r.insert("severity".into(), Value::from(self.severity.clone()));
        r
    }

    pub fn from_record(r: &Metadata) -> Result<Self> {
        Ok(Self {
            event_id: required_str(r, "event_id")?,
            alarm_id: required_str(r, "alarm_id")?,
            change_type: required_str(r, "type")?.parse()?,
            detail: optional_str(r, "detail").unwrap_or_default(),
            user_id: optional_str(r, "user_id"),
            project_id: optional_str(r, "project_id"),
            on_behalf_of: optional_str(r, "on_behalf_of"),
            timestamp: required_ts(r, "timestamp")?,
            severity: optional_str(r, "severity"),
        })
    }
}

/// Structured sample/resource/meter filter
#[derive(Debug, Clone, Default)]
pub struct SampleFilter {
    pub user: Option<String>,
    pub project: Option<String>,
    pub resource: Option<String>,
    pub meter: Option<String>,
    pub source: Option<String>,
    pub message_id: Option<String>,
    pub start_timestamp: Option<Timestamp>,
    pub start_timestamp_op: Option<TimestampOp>,
    pub end_timestamp: Option<Timestamp>,
    pub end_timestamp_op: Option<TimestampOp>,
    /// Keys are `metadata.<path>`
    pub metaquery: Metadata,
}

/// Structured alarm filter
#[derive(Debug, Clone, Default)]
pub struct AlarmFilter {
    pub alarm_id: Option<String>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub project: Option<String>,
    pub state: Option<String>,
    pub enabled: Option<bool>,
    pub alarm_type: Option<String>,
    pub severity: Option<String>,
    pub meter: Option<String>,
}

/// Structured alarm history filter
#[derive(Debug, Clone, Default)]
pub struct AlarmChangeFilter {
    pub alarm_id: String,
    pub on_behalf_of: Option<String>,
    pub user: Option<String>,
    pub project: Option<String>,
    pub change_type: Option<AlarmChangeType>,
    pub severity: Option<String>,
    pub start_timestamp: Option<Timestamp>,
    pub start_timestamp_op: Option<TimestampOp>,
    pub end_timestamp: Option<Timestamp>,
    pub end_timestamp_op: Option<TimestampOp>,
}

fn missing(field: &str) -> Error {
    Error::codec(format!("record is missing required field '{}'", field))
}

fn required_str(r: &Metadata, field: &str) -> Result<String> {
    r.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(field))
}

fn optional_str(r: &Metadata, field: &str) -> Option<String> {
    r.get(field).and_then(Value::as_str).map(str::to_string)
}

fn required_ts(r: &Metadata, field: &str) -> Result<Timestamp> {
    r.get(field)
        .and_then(Value::as_datetime)
        .ok_or_else(|| missing(field))
}

fn optional_ts(r: &Metadata, field: &str) -> Option<Timestamp> {
    r.get(field).and_then(Value::as_datetime)
}

fn optional_map(r: &Metadata, field: &str) -> Metadata {
    r.get(field).and_then(Value::as_map).cloned().unwrap_or_default()
}

fn string_list(r: &Metadata, field: &str) -> Vec<String> {
    r.get(field)
        .and_then(Value::as_list)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn test_timestamp_op_parse() {
        assert_eq!("ge".parse::<TimestampOp>().unwrap(), TimestampOp::Ge);
        assert!("between".parse::<TimestampOp>().is_err());
        assert!(TimestampOp::Le.holds(1, 1));
        assert!(!TimestampOp::Lt.holds(1, 1));
    }

    #[test]
    fn test_alarm_record_roundtrip() {
        let mut rule = Metadata::new();
        rule.insert("threshold".into(), Value::Float(80.0));
        rule.insert("meter_name".into(), Value::from("cpu_util"));
        let alarm = Alarm {
            alarm_id: "a1".into(),
            name: "cpu-high".into(),
            alarm_type: "threshold".into(),
            enabled: true,
            description: "cpu above 80".into(),
            timestamp: at(1),
            user_id: Some("u1".into()),
            project_id: Some("p1".into()),
            state: "ok".into(),
            state_timestamp: at(2),
            severity: Some("critical".into()),
            ok_actions: vec![],
            alarm_actions: vec!["http://hook".into()],
            insufficient_data_actions: vec![],
            repeat_actions: false,
            rule,
            time_constraints: vec![],
        };
        assert_eq!(Alarm::from_record(&alarm.to_record()).unwrap(), alarm);
    }

    #[test]
    fn test_sample_requires_fields() {
        let mut r = Metadata::new();
        r.insert("source".into(), Value::from("openstack"));
        let err = Sample::from_record(&r).unwrap_err();
        assert!(err.to_string().contains("counter_name"));
    }

    #[test]
    fn test_alarm_change_type_names() {
        for t in [
            AlarmChangeType::Creation,
            AlarmChangeType::RuleChange,
            AlarmChangeType::StateTransition,
            AlarmChangeType::Deletion,
        ] {
            assert_eq!(t.as_str().parse::<AlarmChangeType>().unwrap(), t);
        }
    }
}

//! Unit tests for meterbase-core

use chrono::{NaiveDate, NaiveDateTime};
use meterbase_core::{AlarmChange, AlarmChangeType, Metadata, Sample, Value};

fn ts(day: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

mod record_tests {
    use super::*;

    fn create_test_sample() -> Sample {
        let mut meta = Metadata::new();
        meta.insert("display_name".into(), Value::from("web-1"));
        meta.insert("vcpus".into(), Value::Int(2));
        Sample {
            source: "openstack".into(),
            counter_name: "cpu".into(),
            counter_type: "cumulative".into(),
            counter_unit: "ns".into(),
            counter_volume: 1234.5,
            user_id: Some("u1".into()),
            project_id: Some("p1".into()),
            resource_id: "r1".into(),
            timestamp: ts(1, 10),
            resource_metadata: meta,
            message_id: "m1".into(),
            message_signature: Some("sig".into()),
            recorded_at: None,
        }
    }

    #[test]
    fn test_sample_record_roundtrip() {
        let sample = create_test_sample();
        let record = sample.to_record();
        assert_eq!(record.get("counter_volume"), Some(&Value::Float(1234.5)));
        assert_eq!(Sample::from_record(&record).unwrap(), sample);
    }

    #[test]
    fn test_sample_record_survives_json() {
        let sample = create_test_sample();
        let text = Value::Map(sample.to_record()).to_json();
        let back = Value::from_json(&text).unwrap();
        let back = Sample::from_record(back.as_map().unwrap()).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_integer_volume_widens() {
        let mut record = create_test_sample().to_record();
        record.insert("counter_volume".into(), Value::Int(7));
        assert_eq!(Sample::from_record(&record).unwrap().counter_volume, 7.0);
    }

    #[test]
    fn test_alarm_change_ids_are_unique() {
        let a = AlarmChange::new("a1", AlarmChangeType::Creation, ts(1, 0));
        let b = AlarmChange::new("a1", AlarmChangeType::Creation, ts(1, 0));
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(AlarmChange::from_record(&a.to_record()).unwrap(), a);
    }
}

mod property_tests {
    use super::*;
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
                    chrono::DateTime::from_timestamp_micros(micros)
                        .unwrap()
                        .naive_utc(),
                )
            }),
            prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
        ]
    }

    fn value() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_json_roundtrip(v in value()) {
            let back = Value::from_json(&v.to_json()).unwrap();
            prop_assert_eq!(back, v);
        }
    }
}

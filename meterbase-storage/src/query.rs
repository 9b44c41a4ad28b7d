//! # Query Compiler
//!
//! Turns structured filters into what a scan needs: row bounds, a filter
//! expression, and a column projection.
//!
//! ## Reversed timestamps and operators
//!
//! Time-ordered rows store `rts = i64::MAX - micros`, so a bound on time is
//! a bound on `rts` with the comparison flipped: `t >= start` holds exactly
//! when `rts(t) <= rts(start)`. [`OP_SIGN_REV`] encodes that flip and must
//! change together with [`crate::keys::timestamp`].

use tracing::debug;

use meterbase_core::{
    error::{Error, Result},
    types::{SampleFilter, Timestamp, TimestampOp},
    value::{Metadata, Value},
};

use crate::entry::{column, MARKER_VALUE, METER_PREFIX, SOURCE_PREFIX};
use crate::filter::{CompareOp, Comparator, FilterExpr, Predicate};
use crate::keys::{compose, quote, quote_qualifier, timestamp};

/// Operators applied to plain values
pub const OP_SIGN: [(TimestampOp, CompareOp); 6] = [
    (TimestampOp::Eq, CompareOp::Eq),
    (TimestampOp::Lt, CompareOp::Lt),
    (TimestampOp::Le, CompareOp::Le),
    (TimestampOp::Ne, CompareOp::Ne),
    (TimestampOp::Gt, CompareOp::Gt),
    (TimestampOp::Ge, CompareOp::Ge),
];

/// Operators applied to reversed timestamps. Coupled to the reversal in
/// `keys::timestamp`: `op(a, b) == OP_SIGN_REV[op](reverse(a), reverse(b))`.
pub const OP_SIGN_REV: [(TimestampOp, CompareOp); 6] = [
    (TimestampOp::Eq, CompareOp::Eq),
    (TimestampOp::Lt, CompareOp::Gt),
    (TimestampOp::Le, CompareOp::Ge),
    (TimestampOp::Ne, CompareOp::Ne),
    (TimestampOp::Gt, CompareOp::Lt),
    (TimestampOp::Ge, CompareOp::Le),
];

pub const DEFAULT_START_OP: TimestampOp = TimestampOp::Ge;
pub const DEFAULT_END_OP: TimestampOp = TimestampOp::Lt;

/// Stands in for a missing start bound; sorts after every rendered rts
pub const OPEN_START_SENTINEL: &str = "z";

/// Appended to the stop row; the byte right after `:`, so every row
/// keyed at exactly the earlier bound sorts before the exclusive stop
pub const STOP_SUFFIX: char = ';';

fn lookup(table: &[(TimestampOp, CompareOp); 6], op: TimestampOp) -> CompareOp {
    table
        .iter()
        .find(|(k, _)| *k == op)
        .map(|(_, v)| *v)
        .unwrap_or(CompareOp::Eq)
}

pub fn op_sign(op: TimestampOp) -> CompareOp {
    lookup(&OP_SIGN, op)
}

pub fn op_sign_rev(op: TimestampOp) -> CompareOp {
    lookup(&OP_SIGN_REV, op)
}

/// Equality predicates in the order they are emitted
pub type Equalities = Vec<(String, Value)>;

/// Build an equality list, skipping absent values
pub fn equalities<'a, I>(pairs: I) -> Equalities
where
    I: IntoIterator<Item = (&'a str, Option<Value>)>,
{
    pairs
        .into_iter()
        .filter_map(|(k, v)| v.filter(|v| !v.is_null()).map(|v| (k.to_string(), v)))
        .collect()
}

fn source_qualifier(value: &Value) -> String {
    match value.as_str() {
        Some(s) => format!("{}{}", SOURCE_PREFIX, s),
        None => format!("{}{}", SOURCE_PREFIX, value.to_json()),
    }
}

/// Equality and metadata predicates, `AND`-joined
pub fn make_query(equalities: &[(String, Value)], metaquery: &Metadata) -> Option<FilterExpr> {
    let mut expr = FilterExpr::new();
    for (key, value) in equalities {
        if value.is_null() {
            continue;
        }
        if key == "source" {
            expr.push(Predicate::column_equals(source_qualifier(value), MARKER_VALUE));
        } else {
            expr.push(Predicate::column_equals(quote_qualifier(key), value.to_json()));
        }
    }
    for (key, value) in metaquery {
        expr.push(Predicate::column_equals(format!("r_{}", key), value.to_json()));
    }
    expr.into_option()
}

/// Rendered reversed bound, or empty when absent
fn rts_bound(ts: Option<&Timestamp>) -> Result<String> {
    Ok(match ts {
        Some(ts) => timestamp(ts, true)?.to_string(),
        None => String::new(),
    })
}

/// Row bounds plus optional `rts` predicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampQuery {
    pub start_row: Option<String>,
    pub end_row: Option<String>,
    pub filter: Option<FilterExpr>,
}

/// Reverse the time bounds, hand them to `row_key_fn` for row bounds, and
/// unless `bounds_only` add `rts` comparisons.
///
/// `row_key_fn` receives `(rts_start, rts_end)`, empty when unbounded.
pub fn make_timestamp_query<F>(
    row_key_fn: F,
    start: Option<&Timestamp>,
    start_op: Option<TimestampOp>,
    end: Option<&Timestamp>,
    end_op: Option<TimestampOp>,
    bounds_only: bool,
) -> Result<TimestampQuery>
where
    F: FnOnce(&str, &str) -> (Option<String>, Option<String>),
{
    let rts_start = rts_bound(start)?;
    let rts_end = rts_bound(end)?;
    let (start_row, end_row) = row_key_fn(&rts_start, &rts_end);

    if bounds_only {
        return Ok(TimestampQuery {
            start_row,
            end_row,
            filter: None,
        });
    }

    let mut expr = FilterExpr::new();
    if !rts_start.is_empty() {
        let op = op_sign_rev(start_op.unwrap_or(DEFAULT_START_OP));
        expr.push(Predicate::column_compare("rts", op, rts_start, None));
    }
    if !rts_end.is_empty() {
        let op = op_sign_rev(end_op.unwrap_or(DEFAULT_END_OP));
        expr.push(Predicate::column_compare("rts", op, rts_end, None));
    }

    Ok(TimestampQuery {
        start_row,
        end_row,
        filter: expr.into_option(),
    })
}

/// Row bounds for every `<id>:<rts>...` row between two reversed bounds.
///
/// Ascending key order is descending time, so the start row comes from the
/// later bound and the stop row from the earlier one.
pub fn make_general_rowkey_scan(
    some_id: Option<&str>,
    rts_start: &str,
    rts_end: &str,
) -> (Option<String>, Option<String>) {
    let Some(id) = some_id else {
        return (None, None);
    };
    let rts_start = if rts_start.is_empty() {
        OPEN_START_SENTINEL
    } else {
        rts_start
    };
    let start_row = compose([id, rts_end]);
    let mut end_row = compose([id, rts_start]);
    end_row.push(STOP_SUFFIX);
    (Some(start_row), Some(end_row))
}

/// Projection for meter-table scans covering every filtered column
pub fn get_meter_columns(
    equalities: &[(String, Value)],
    metaquery: &Metadata,
    need_timestamp: bool,
) -> Vec<String> {
    let mut columns = vec![column("message"), column("recorded_at")];
    let mut add = |col: String| {
        if !columns.contains(&col) {
            columns.push(col);
        }
    };

    for (key, value) in equalities {
        if value.is_null() {
            continue;
        }
        add(column(&quote_qualifier(key)));
        if key == "source" {
            add(column(&source_qualifier(value)));
        }
    }
    for key in metaquery.keys() {
        add(column(&format!("r_{}", key)));
    }
    if need_timestamp {
        add(column("rts"));
        add(column("timestamp"));
    }
    columns
}

/// Everything needed to scan the meter table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleQuery {
    pub filter: Option<FilterExpr>,
    pub start_row: Option<String>,
    pub end_row: Option<String>,
    pub columns: Vec<String>,
}

/// Compile a sample filter into a meter-table scan
pub fn make_sample_query_from_filter(filter: &SampleFilter, require_meter: bool) -> Result<SampleQuery> {
    let meter = filter.meter.as_deref();
    if meter.is_none() && require_meter {
        return Err(Error::MissingMeterSpecifier);
    }

    let ts_query = make_timestamp_query(
        |rts_start, rts_end| make_general_rowkey_scan(meter, rts_start, rts_end),
        filter.start_timestamp.as_ref(),
        filter.start_timestamp_op,
        filter.end_timestamp.as_ref(),
        filter.end_timestamp_op,
        false,
    )?;

    let eqs = equalities([
        ("user_id", filter.user.clone().map(Value::from)),
        ("project_id", filter.project.clone().map(Value::from)),
        ("counter_name", filter.meter.clone().map(Value::from)),
        ("resource_id", filter.resource.clone().map(Value::from)),
        ("source", filter.source.clone().map(Value::from)),
        ("message_id", filter.message_id.clone().map(Value::from)),
    ]);

    let mut expr = make_query(&eqs, &filter.metaquery).unwrap_or_default();
    if let Some(ts_filter) = ts_query.filter {
        expr.extend(ts_filter);
    }

    let need_timestamp = filter.start_timestamp.is_some() || filter.end_timestamp.is_some();
    let columns = get_meter_columns(&eqs, &filter.metaquery, need_timestamp);
    let query = SampleQuery {
        filter: expr.into_option(),
        start_row: ts_query.start_row,
        end_row: ts_query.end_row,
        columns,
    };
    debug!("Compiled sample query: {:?}", query);
    Ok(query)
}

fn meter_qualifier_filter(op: CompareOp, suffix: &str) -> Predicate {
    Predicate::Qualifier {
        op,
        comparator: Comparator::BinaryPrefix(format!("{}{}", METER_PREFIX, suffix)),
    }
}

/// Narrow resource rows to meters inside a time range, appended after
/// `query`. The leading `m_` guard keeps qualifiers such as `s_test` from
/// passing a pure range comparison.
pub fn make_meter_query_for_resource(
    start: Option<&Timestamp>,
    start_op: Option<TimestampOp>,
    end: Option<&Timestamp>,
    end_op: Option<TimestampOp>,
    source: Option<&str>,
    query: Option<FilterExpr>,
) -> Result<Option<FilterExpr>> {
    let rts_start = rts_bound(start)?;
    let rts_end = rts_bound(end)?;
    let with_source = |rts: &str| match source {
        Some(source) => format!("{}:{}", rts, quote(source)),
        None => rts.to_string(),
    };

    let mut meter_q = Vec::new();
    if !rts_start.is_empty() {
        let op = op_sign_rev(start_op.unwrap_or(DEFAULT_START_OP));
        meter_q.push(meter_qualifier_filter(op, &with_source(&rts_start)));
    }
    if !rts_end.is_empty() {
        let op = op_sign_rev(end_op.unwrap_or(DEFAULT_END_OP));
        meter_q.push(meter_qualifier_filter(op, &with_source(&rts_end)));
    }

    if meter_q.is_empty() {
        return Ok(query);
    }

    let mut expr = query.unwrap_or_default();
    expr.push(meter_qualifier_filter(CompareOp::Eq, ""));
    for p in meter_q {
        expr.push(p);
    }
    Ok(Some(expr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_make_query_user_and_source() {
        let eqs = equalities([
            ("user_id", Some(Value::from("u1"))),
            ("project_id", None),
            ("source", Some(Value::from("src1"))),
        ]);
        let q = make_query(&eqs, &Metadata::new()).unwrap();
        assert_eq!(
            q.to_string(),
            r#"SingleColumnValueFilter ('f', 'user_id', =, 'binary:"u1"', true, true) AND SingleColumnValueFilter ('f', 's_src1', =, 'binary:"1"', true, true)"#
        );
    }

    #[test]
    fn test_make_query_metadata_and_empty() {
        assert!(make_query(&[], &Metadata::new()).is_none());

        let mut meta = Metadata::new();
        meta.insert("metadata.display_name".into(), Value::from("web-1"));
        let q = make_query(&[], &meta).unwrap();
        assert_eq!(
            q.to_string(),
            r#"SingleColumnValueFilter ('f', 'r_metadata.display_name', =, 'binary:"web-1"', true, true)"#
        );
    }

    #[test]
    fn test_op_tables_agree_with_reversal() {
        let a = day(1);
        let b = day(2);
        for (x, y) in [(a, b), (b, a), (a, a)] {
            let (rx, ry) = (timestamp(&x, true).unwrap(), timestamp(&y, true).unwrap());
            for op in TimestampOp::ALL {
                assert_eq!(
                    op_sign(op).matches(x.cmp(&y)),
                    op_sign_rev(op).matches(rx.cmp(&ry)),
                    "operator {} disagrees",
                    op
                );
            }
        }
    }

    #[test]
    fn test_general_rowkey_scan() {
        assert_eq!(make_general_rowkey_scan(None, "1", "2"), (None, None));
        assert_eq!(
            make_general_rowkey_scan(Some("a1"), "", ""),
            (Some("a1:".to_string()), Some("a1:z;".to_string()))
        );
        assert_eq!(
            make_general_rowkey_scan(Some("a:1"), "9200", "9100"),
            (Some("a%3A1:9100".to_string()), Some("a%3A1:9200;".to_string()))
        );
    }

    #[test]
    fn test_timestamp_query_defaults() {
        let q = make_timestamp_query(
            |s, e| make_general_rowkey_scan(Some("cpu"), s, e),
            Some(&day(1)),
            None,
            Some(&day(2)),
            None,
            false,
        )
        .unwrap();
        let rs = timestamp(&day(1), true).unwrap();
        let re = timestamp(&day(2), true).unwrap();
        assert_eq!(q.start_row, Some(format!("cpu:{}", re)));
        assert_eq!(q.end_row, Some(format!("cpu:{};", rs)));
        assert_eq!(
            q.filter.unwrap().to_string(),
            format!(
                "SingleColumnValueFilter ('f', 'rts', <=, 'binary:{}') AND SingleColumnValueFilter ('f', 'rts', >, 'binary:{}')",
                rs, re
            )
        );

        let bounds = make_timestamp_query(|_, _| (None, None), Some(&day(1)), None, None, None, true).unwrap();
        assert!(bounds.filter.is_none());
    }

    #[test]
    fn test_sample_query_requires_meter() {
        let err = make_sample_query_from_filter(&SampleFilter::default(), true).unwrap_err();
        assert!(matches!(err, Error::MissingMeterSpecifier));
        assert!(make_sample_query_from_filter(&SampleFilter::default(), false).is_ok());
    }

    #[test]
    fn test_sample_query_columns() {
        let filter = SampleFilter {
            meter: Some("cpu".into()),
            source: Some("openstack".into()),
            start_timestamp: Some(day(1)),
            ..Default::default()
        };
        let q = make_sample_query_from_filter(&filter, true).unwrap();
        assert_eq!(
            q.columns,
            vec![
                "f:message",
                "f:recorded_at",
                "f:counter_name",
                "f:source",
                "f:s_openstack",
                "f:rts",
                "f:timestamp"
            ]
        );
        for col in q.filter.unwrap().referenced_columns() {
            assert!(q.columns.contains(&col), "{} missing from projection", col);
        }
    }

    #[test]
    fn test_meter_query_for_resource() {
        let base = make_query(&equalities([("user_id", Some(Value::from("u1")))]), &Metadata::new());
        let q = make_meter_query_for_resource(Some(&day(1)), None, None, None, Some("src 1"), base)
            .unwrap()
            .unwrap();
        let rs = timestamp(&day(1), true).unwrap();
        assert_eq!(
            q.to_string(),
            format!(
                r#"SingleColumnValueFilter ('f', 'user_id', =, 'binary:"u1"', true, true) AND QualifierFilter (=, 'binaryprefix:m_') AND QualifierFilter (<=, 'binaryprefix:m_{}:src%201')"#,
                rs
            )
        );

        assert!(make_meter_query_for_resource(None, None, None, None, None, None).unwrap().is_none());
    }
}

//! Sequential evaluation of a filter expression over scanned rows.
//!
//! Each predicate narrows the output of the previous one. Row order is
//! never changed.

use regex::bytes::Regex;

use meterbase_core::error::{Error, Result};
use meterbase_core::traits::Row;

use super::{CompareOp, Comparator, FilterExpr, Predicate};

/// A comparator prepared for repeated use
enum Matcher {
    Binary(Vec<u8>),
    Prefix(Vec<u8>),
    Regex(Regex),
    Substring(Vec<u8>),
}

impl Matcher {
    /// Compile and check the operator is one the comparator supports
    fn compile(filter: &'static str, op: CompareOp, comparator: &Comparator, anchored: bool) -> Result<Self> {
        match comparator {
            Comparator::Binary(v) => Ok(Matcher::Binary(v.as_bytes().to_vec())),
            Comparator::BinaryPrefix(v) => Ok(Matcher::Prefix(v.as_bytes().to_vec())),
            Comparator::RegexString(pattern) => {
                if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    return Err(Error::unsupported_operator(filter, op));
                }
                let pattern = if anchored {
                    format!("^(?:{})$", pattern)
                } else {
                    pattern.clone()
                };
                Regex::new(&pattern)
                    .map(Matcher::Regex)
                    .map_err(|e| Error::InvalidFilter {
                        offset: 0,
                        message: format!("bad regex in {}: {}", filter, e),
                    })
            }
            Comparator::Substring(v) => {
                if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    return Err(Error::unsupported_operator(filter, op));
                }
                Ok(Matcher::Substring(v.as_bytes().to_vec()))
            }
        }
    }

    /// `value <op> comparator`
    fn test(&self, op: CompareOp, value: &[u8]) -> bool {
        match self {
            Matcher::Binary(v) => op.matches(value.cmp(v.as_slice())),
            Matcher::Prefix(p) => {
                let head = &value[..p.len().min(value.len())];
                op.matches(head.cmp(p.as_slice()))
            }
            Matcher::Regex(re) => (op == CompareOp::Eq) == re.is_match(value),
            Matcher::Substring(s) => {
                let found = s.is_empty() || value.windows(s.len()).any(|w| w == s.as_slice());
                (op == CompareOp::Eq) == found
            }
        }
    }
}

fn qualifier_of(column: &str) -> &str {
    column.split_once(':').map(|(_, q)| q).unwrap_or(column)
}

/// Apply every predicate of `expr` to `rows`, left to right
pub fn apply(expr: &FilterExpr, mut rows: Vec<Row>) -> Result<Vec<Row>> {
    for predicate in expr.predicates() {
        rows = apply_one(predicate, rows)?;
    }
    Ok(rows)
}

fn apply_one(predicate: &Predicate, rows: Vec<Row>) -> Result<Vec<Row>> {
    let filter = predicate.name();
    match predicate {
        Predicate::SingleColumnValue {
            family,
            qualifier,
            op,
            comparator,
            if_missing,
            ..
        } => {
            let matcher = Matcher::compile(filter, *op, comparator, false)?;
            let column = format!("{}:{}", family, qualifier);
            let drop_missing = if_missing.unwrap_or(false);
            Ok(rows
                .into_iter()
                .filter(|(_, cells)| match cells.get(&column) {
                    Some(value) => matcher.test(*op, value),
                    None => !drop_missing,
                })
                .collect())
        }

        Predicate::ColumnPrefix { prefix } => Ok(rows
            .into_iter()
            .filter_map(|(key, mut cells)| {
                cells.retain(|col, _| qualifier_of(col).starts_with(prefix.as_str()));
                (!cells.is_empty()).then_some((key, cells))
            })
            .collect()),

        Predicate::Row { op, comparator } => {
            if *op != CompareOp::Eq {
                return Err(Error::unsupported_operator(filter, op));
            }
            let matcher = Matcher::compile(filter, *op, comparator, true)?;
            Ok(rows
                .into_iter()
                .filter(|(key, _)| matcher.test(*op, key))
                .collect())
        }

        Predicate::Qualifier { op, comparator } => {
            let matcher = Matcher::compile(filter, *op, comparator, false)?;
            Ok(rows
                .into_iter()
                .filter_map(|(key, mut cells)| {
                    cells.retain(|col, _| matcher.test(*op, qualifier_of(col).as_bytes()));
                    (!cells.is_empty()).then_some((key, cells))
                })
                .collect())
        }
    }
}

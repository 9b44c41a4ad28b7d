//! # Filter Expressions
//!
//! The predicate language a column-family store evaluates server side:
//!
//! ```text
//! Expr := Pred ("AND" Pred)*
//! Pred := Name "(" Arg ("," Arg)* ")"
//! Arg  := 'quoted literal' | operator | true | false
//! ```
//!
//! Expressions are built as typed values by the query compiler, rendered
//! to text for the store, and parsed back by the in-process emulator. The
//! rendered text is canonical: `parse(render(e)) == e`.

use std::fmt;
use std::str::FromStr;

use meterbase_core::error::{Error, Result};

mod eval;
mod parser;

pub use eval::apply;
pub use parser::parse;

/// Comparison operator as written in filter text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Ne,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "=" => CompareOp::Eq,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Le,
            "!=" => CompareOp::Ne,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Ge,
            _ => return None,
        })
    }

    /// Apply to an ordering of `lhs` relative to `rhs`
    pub fn matches(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
            CompareOp::Ne => ordering != Equal,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand side of a comparison, `type:value` in filter text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparator {
    Binary(String),
    BinaryPrefix(String),
    RegexString(String),
    Substring(String),
}

impl Comparator {
    pub fn kind(&self) -> &'static str {
        match self {
            Comparator::Binary(_) => "binary",
            Comparator::BinaryPrefix(_) => "binaryprefix",
            Comparator::RegexString(_) => "regexstring",
            Comparator::Substring(_) => "substring",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Comparator::Binary(v)
            | Comparator::BinaryPrefix(v)
            | Comparator::RegexString(v)
            | Comparator::Substring(v) => v,
        }
    }
}

impl FromStr for Comparator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, value) = s.split_once(':').ok_or_else(|| Error::InvalidFilter {
            offset: 0,
            message: format!("comparator '{}' has no type", s),
        })?;
        let value = value.to_string();
        match kind {
            "binary" => Ok(Comparator::Binary(value)),
            "binaryprefix" => Ok(Comparator::BinaryPrefix(value)),
            "regexstring" => Ok(Comparator::RegexString(value)),
            "substring" => Ok(Comparator::Substring(value)),
            other => Err(Error::InvalidFilter {
                offset: 0,
                message: format!("unknown comparator type '{}'", other),
            }),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.value())
    }
}

/// One filter in an `AND` chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    SingleColumnValue {
        family: String,
        qualifier: String,
        op: CompareOp,
        comparator: Comparator,
        /// Drop rows lacking the column. HBase's `filterIfMissing`.
        if_missing: Option<bool>,
        latest_only: Option<bool>,
    },
    ColumnPrefix {
        prefix: String,
    },
    Row {
        op: CompareOp,
        comparator: Comparator,
    },
    Qualifier {
        op: CompareOp,
        comparator: Comparator,
    },
}

impl Predicate {
    /// Equality on a column, skipping rows where it is missing
    pub fn column_equals(qualifier: impl Into<String>, binary: impl Into<String>) -> Self {
        Self::column_compare(qualifier, CompareOp::Eq, binary, Some(true))
    }

    pub fn column_compare(
        qualifier: impl Into<String>,
        op: CompareOp,
        binary: impl Into<String>,
        if_missing: Option<bool>,
    ) -> Self {
        Predicate::SingleColumnValue {
            family: crate::entry::FAMILY.to_string(),
            qualifier: qualifier.into(),
            op,
            comparator: Comparator::Binary(binary.into()),
            if_missing,
            latest_only: if_missing,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Predicate::SingleColumnValue { .. } => "SingleColumnValueFilter",
            Predicate::ColumnPrefix { .. } => "ColumnPrefixFilter",
            Predicate::Row { .. } => "RowFilter",
            Predicate::Qualifier { .. } => "QualifierFilter",
        }
    }
}

/// Render a literal with single quotes doubled
fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::SingleColumnValue {
                family,
                qualifier,
                op,
                comparator,
                if_missing,
                latest_only,
            } => {
                write!(
                    f,
                    "{} ({}, {}, {}, {}",
                    self.name(),
                    literal(family),
                    literal(qualifier),
                    op,
                    literal(&comparator.to_string())
                )?;
                if let Some(if_missing) = if_missing {
                    write!(f, ", {}", if_missing)?;
                    if let Some(latest_only) = latest_only {
                        write!(f, ", {}", latest_only)?;
                    }
                }
                f.write_str(")")
            }
            Predicate::ColumnPrefix { prefix } => {
                write!(f, "{} ({})", self.name(), literal(prefix))
            }
            Predicate::Row { op, comparator } | Predicate::Qualifier { op, comparator } => {
                write!(f, "{} ({}, {})", self.name(), op, literal(&comparator.to_string()))
            }
        }
    }
}

/// Conjunction of predicates, applied left to right
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExpr {
    predicates: Vec<Predicate>,
}

impl FilterExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_predicates(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    pub fn extend(&mut self, other: FilterExpr) {
        self.predicates.extend(other.predicates);
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// `None` for an empty conjunction
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    /// Every `family:qualifier` a value predicate reads
    pub fn referenced_columns(&self) -> Vec<String> {
        self.predicates
            .iter()
            .filter_map(|p| match p {
                Predicate::SingleColumnValue { family, qualifier, .. } => {
                    Some(format!("{}:{}", family, qualifier))
                }
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.predicates.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{}", p)?;
        }
        Ok(())
    }
}

impl FromStr for FilterExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

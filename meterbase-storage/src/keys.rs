//! # Key Codec
//!
//! Row keys and compound qualifiers are sequences of fields joined by `:`.
//! Each field is percent-quoted first, so neither `:` nor `%` ever appears
//! unescaped inside a field and the separator stays unambiguous:
//!
//! ```text
//! compose(["a:b", 9221667969654775807])  ->  "a%3Ab:9221667969654775807"
//! ```
//!
//! Time-ordered keys embed a reversed timestamp so that a forward scan yields
//! the newest row first. Reversed values stay 19 digits wide for any instant
//! this side of the year 250000, so byte order matches numeric order.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, NaiveDateTime};

use meterbase_core::error::{Error, Result};

/// Field separator inside composite keys
pub const SEPARATOR: char = ':';

/// One logical field of a composite key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPart<'a> {
    Str(&'a str),
    Int(i64),
}

impl<'a> From<&'a str> for KeyPart<'a> {
    fn from(s: &'a str) -> Self {
        KeyPart::Str(s)
    }
}

impl<'a> From<&'a String> for KeyPart<'a> {
    fn from(s: &'a String) -> Self {
        KeyPart::Str(s.as_str())
    }
}

impl From<i64> for KeyPart<'_> {
    fn from(i: i64) -> Self {
        KeyPart::Int(i)
    }
}

impl fmt::Display for KeyPart<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Str(s) => f.write_str(&quote(s)),
            KeyPart::Int(i) => write!(f, "{}", i),
        }
    }
}

/// Percent-quote a field. Only `A-Z a-z 0-9 - . _ ~` pass through.
pub fn quote(field: &str) -> Cow<'_, str> {
    urlencoding::encode(field)
}

/// Quote a scalar qualifier name, leaving `:` literal so names that are
/// already composite stay composite
pub fn quote_qualifier(name: &str) -> String {
    name.split(SEPARATOR)
        .map(quote)
        .collect::<Vec<_>>()
        .join(":")
}

/// Reverse [`quote`]
pub fn unquote(field: &str) -> Result<String> {
    let bytes = field.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(Error::codec(format!(
                    "malformed escape at offset {} in '{}'",
                    i, field
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(field)
        .map(Cow::into_owned)
        .map_err(|e| Error::codec(format!("unquoted field is not UTF-8: {}", e)))
}

/// Join fields into a composite key
pub fn compose<'a, I>(parts: I) -> String
where
    I: IntoIterator,
    I::Item: Into<KeyPart<'a>>,
{
    let mut key = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            key.push(SEPARATOR);
        }
        key.push_str(&part.into().to_string());
    }
    key
}

/// Split a composite key back into unquoted fields
pub fn decompose(key: &str) -> Result<Vec<String>> {
    key.split(SEPARATOR).map(unquote).collect()
}

/// Microseconds since the epoch, optionally reversed
pub fn timestamp(dt: &NaiveDateTime, reverse: bool) -> Result<i64> {
    let micros = dt.and_utc().timestamp_micros();
    if micros < 0 {
        return Err(Error::codec(format!("timestamp {} is before the epoch", dt)));
    }
    Ok(if reverse { i64::MAX - micros } else { micros })
}

/// Inverse of [`timestamp`]
pub fn datetime_from_timestamp(value: i64, reversed: bool) -> Result<NaiveDateTime> {
    let micros = if reversed { i64::MAX - value } else { value };
    if micros < 0 {
        return Err(Error::codec(format!("timestamp value {} is out of range", value)));
    }
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| Error::codec(format!("timestamp value {} is out of range", value)))
}

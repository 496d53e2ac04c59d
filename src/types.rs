//! Core type definitions for the fact store

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_FACT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a fact, unique for the life of the process.
///
/// Evaluation caches key on this, never on property values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactId(pub u64);

impl FactId {
    pub fn next() -> Self {
        FactId(NEXT_FACT_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A single property value (heterogeneous scalar types)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Time(DateTime<Utc>),
}

impl Value {
    /// Name of the scalar kind, as reported by the `type` operator
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Str(_) => "String",
            Value::Time(_) => "Time",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Ordering across kinds: numbers compare with numbers, strings with
    /// strings, times with times. Anything else is incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Equality used by `eq`: timestamps are compared in whole seconds.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Time(a), Value::Time(b)) => a.timestamp() == b.timestamp(),
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

/// Value equality as used by fact histories: kinds must match exactly.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
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
impl<Tz: TimeZone> From<DateTime<Tz>> for Value {
    fn from(t: DateTime<Tz>) -> Self {
        Value::Time(t.with_timezone(&Utc))
    }
}

/// Canonical text: the form the tokenizer reads back.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Str(s) => write!(f, "'{}'", escape(s)),
            Value::Time(t) => write!(f, "{}", format_time(t)),
        }
    }
}

pub fn escape(s: &str) -> String {
    s.replace('\'', "\\'").replace('"', "\\\"")
}

pub fn format_time(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Floats always carry a fraction, and switch to `d.de+N` notation from
/// 1e16 upwards, so that `3.0e+21` survives a print/parse cycle.
pub fn format_float(v: f64) -> String {
    if !v.is_finite() {
        return v.to_string();
    }
    let abs = v.abs();
    if abs >= 1e16 || (abs > 0.0 && abs < 1e-4) {
        let sci = format!("{:e}", v);
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{}.0", mantissa)
        };
        match exponent.strip_prefix('-') {
            Some(exp) => format!("{}e-{:0>2}", mantissa, exp),
            None => format!("{}e+{:0>2}", mantissa, exponent),
        }
    } else {
        let plain = v.to_string();
        if plain.contains('.') {
            plain
        } else {
            format!("{}.0", plain)
        }
    }
}

/// Bound query parameters: the values `$name` symbols resolve to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, Vec<Value>>);

impl Params {
    pub fn new() -> Self {
        Params(BTreeMap::new())
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.entry(name.to_string()).or_default().push(value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Vec<Value>> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_float_format() {
        assert_eq!(format_float(42.998), "42.998");
        assert_eq!(format_float(3.1415926), "3.1415926");
        assert_eq!(format_float(3.0e21), "3.0e+21");
        assert_eq!(format_float(100.0), "100.0");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(Value::from("Dude's").to_string(), "'Dude\\'s'");
        assert_eq!(Value::from("\"x\"").to_string(), "'\\\"x\\\"'");
    }

    #[test]
    fn test_time_is_normalized_to_utc() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let t = offset.with_ymd_and_hms(2024, 5, 25, 22, 43, 48).unwrap();
        assert_eq!(Value::from(t).to_string(), "2024-05-25T19:43:48Z");
    }

    #[test]
    fn test_compare_across_kinds() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::Int(1).compare(&Value::from("1")), None);
        assert!(Value::Int(42).loosely_equals(&Value::Float(42.0)));
        assert_ne!(Value::Int(42), Value::Float(42.0));
    }

    #[test]
    fn test_time_equality_ignores_fraction() {
        let a = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let b = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        assert!(Value::from(a).loosely_equals(&Value::from(b)));
        assert_eq!(Value::from(a).compare(&Value::from(b)), Some(Ordering::Less));
    }
}

//! Facts: append-only, multi-valued property logs
//!
//! A fact maps property names (in first-write order) to the distinct values
//! ever written to them. Reading a property returns the first value recorded;
//! the whole history stays available through [`Fact::history`].
//!
//! Each fact's properties sit behind their own lock, taken for the length of
//! a single read or write. Handles are cheap to clone and share the same
//! underlying slot.

use crate::error::{FactbaseError, Result};
use crate::overlay::Source;
use crate::types::{FactId, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Names that collide with operations on the fact itself
pub const RESERVED_NAMES: &[&str] = &[
    "all_properties",
    "history",
    "to_s",
    "to_string",
    "class",
    "clone",
    "inspect",
];

/// Anything a term can be evaluated against: stored facts, overlays, and
/// the synthetic empty fact used by aggregates.
pub trait Subject {
    /// Identity used as the evaluation cache key
    fn identity(&self) -> FactId;

    /// Whole history of a property, `None` when absent
    fn lookup(&self, name: &str) -> Option<Vec<Value>>;

    fn property_names(&self) -> Vec<String>;

    /// Where `$name` symbols resolve, if anywhere
    fn parameters(&self) -> Option<Arc<Source>> {
        None
    }
}

/// A single appended value, enough to undo it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub name: String,
    pub prior_len: usize,
}

/// Observer of successful writes. An error from a listener undoes the write
/// that triggered it and is returned to the writer.
pub trait FactListener: Send + Sync {
    fn on_write(&self, fact: &Fact, change: &Change) -> Result<()>;
}

/// Property map in insertion order
#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: Vec<(String, Vec<Value>)>,
}

impl Properties {
    pub fn get(&self, name: &str) -> Option<&Vec<Value>> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Vec<Value>)> {
        self.entries.iter()
    }

    /// Append unless the value is already in the history
    fn append(&mut self, name: &str, value: Value) -> Option<Change> {
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some((_, history)) => {
                if history.contains(&value) {
                    return None;
                }
                let prior_len = history.len();
                history.push(value);
                Some(Change {
                    name: name.to_string(),
                    prior_len,
                })
            }
            None => {
                self.entries.push((name.to_string(), vec![value]));
                Some(Change {
                    name: name.to_string(),
                    prior_len: 0,
                })
            }
        }
    }

    /// Cut a history back to `prior_len`, dropping the property when empty
    pub(crate) fn truncate(&mut self, change: &Change) {
        if let Some(pos) = self.entries.iter().position(|(k, _)| *k == change.name) {
            if change.prior_len == 0 {
                self.entries.remove(pos);
            } else {
                self.entries[pos].1.truncate(change.prior_len);
            }
        }
    }
}

/// Storage slot of one fact
#[derive(Debug)]
pub struct FactCell {
    id: FactId,
    props: Mutex<Properties>,
    reserved: Arc<Vec<String>>,
}

impl FactCell {
    pub fn new(reserved: Arc<Vec<String>>) -> Self {
        FactCell {
            id: FactId::next(),
            props: Mutex::new(Properties::default()),
            reserved,
        }
    }

    pub fn id(&self) -> FactId {
        self.id
    }

    pub(crate) fn revert(&self, change: &Change) {
        self.props.lock().truncate(change);
    }
}

/// Shared handle to a fact
#[derive(Clone)]
pub struct Fact {
    cell: Arc<FactCell>,
    listeners: Vec<Arc<dyn FactListener>>,
}

impl Fact {
    /// A fact that belongs to no store
    pub fn new() -> Self {
        Fact::from_cell(Arc::new(FactCell::new(Arc::new(Vec::new()))))
    }

    pub(crate) fn from_cell(cell: Arc<FactCell>) -> Self {
        Fact {
            cell,
            listeners: Vec::new(),
        }
    }

    /// Build a detached fact from `(name, values)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<Value>)>,
        S: AsRef<str>,
    {
        let fact = Fact::new();
        for (name, values) in pairs {
            fact.set_all(name.as_ref(), values)?;
        }
        Ok(fact)
    }

    /// Same fact, with one more listener notified on every write
    pub fn observed_by(&self, listener: Arc<dyn FactListener>) -> Fact {
        let mut fact = self.clone();
        fact.listeners.push(listener);
        fact
    }

    /// Same fact, without any listeners
    pub fn detached(&self) -> Fact {
        Fact::from_cell(Arc::clone(&self.cell))
    }

    pub fn id(&self) -> FactId {
        self.cell.id
    }

    pub(crate) fn cell(&self) -> &Arc<FactCell> {
        &self.cell
    }

    /// Record a value for a property.
    ///
    /// Values already in the property's history are ignored. Empty strings,
    /// NaN and reserved or malformed names are rejected.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.check_name(name)?;
        check_value(name, &value)?;
        let change = self.cell.props.lock().append(name, value);
        match change {
            Some(change) => self.notify(&change),
            None => Ok(()),
        }
    }

    /// Record several values; an empty list counts as writing nothing, which
    /// is an error
    pub fn set_all(&self, name: &str, values: Vec<Value>) -> Result<()> {
        if values.is_empty() {
            return Err(FactbaseError::InvalidProperty(format!(
                "an empty value can't be written to '{}'",
                name
            )));
        }
        for value in values {
            self.set(name, value)?;
        }
        Ok(())
    }

    fn notify(&self, change: &Change) -> Result<()> {
        for listener in &self.listeners {
            if let Err(e) = listener.on_write(self, change) {
                self.cell.revert(change);
                return Err(e);
            }
        }
        Ok(())
    }

    /// First value ever written to the property
    pub fn get(&self, name: &str) -> Result<Value> {
        self.cell
            .props
            .lock()
            .get(name)
            .and_then(|history| history.first().cloned())
            .ok_or_else(|| FactbaseError::NotFound(name.to_string()))
    }

    /// All values written to the property, oldest first
    pub fn history(&self, name: &str) -> Option<Vec<Value>> {
        self.cell.props.lock().get(name).cloned()
    }

    pub fn all_properties(&self) -> Vec<String> {
        self.cell.props.lock().names()
    }

    pub fn is_empty(&self) -> bool {
        self.cell.props.lock().is_empty()
    }

    /// Copy of the whole property map
    pub fn snapshot(&self) -> Properties {
        self.cell.props.lock().clone()
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if !is_property_name(name) {
            return Err(FactbaseError::InvalidProperty(format!(
                "wrong property name '{}'",
                name
            )));
        }
        if RESERVED_NAMES.contains(&name) || self.cell.reserved.iter().any(|r| r == name) {
            return Err(FactbaseError::InvalidProperty(format!(
                "property name '{}' is reserved",
                name
            )));
        }
        Ok(())
    }
}

impl Default for Fact {
    fn default() -> Self {
        Fact::new()
    }
}

fn check_value(name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Str(s) if s.is_empty() => Err(FactbaseError::InvalidProperty(format!(
            "an empty string can't be written to '{}'",
            name
        ))),
        Value::Float(f) if f.is_nan() => Err(FactbaseError::InvalidProperty(format!(
            "NaN can't be written to '{}'",
            name
        ))),
        _ => Ok(()),
    }
}

/// `[_a-z][a-zA-Z0-9_]*`
pub fn is_property_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_lowercase() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

impl Subject for Fact {
    fn identity(&self) -> FactId {
        self.id()
    }

    fn lookup(&self, name: &str) -> Option<Vec<Value>> {
        self.history(name)
    }

    fn property_names(&self) -> Vec<String> {
        self.all_properties()
    }
}

pub(crate) fn render(props: &Properties) -> String {
    let items: Vec<String> = props
        .iter()
        .map(|(name, values)| {
            let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            format!("{}: [{}]", name, values.join(", "))
        })
        .collect();
    format!("[ {} ]", items.join(", "))
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render(&self.snapshot()))
    }
}

impl fmt::Debug for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fact#{} {}", self.id().as_u64(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};

    #[test]
    fn test_injects_data_correctly() {
        let f = Fact::new();
        f.set("foo", 1).unwrap();
        f.set("bar", 2).unwrap();
        f.set("bar", 3).unwrap();
        assert_eq!(f.all_properties(), vec!["foo", "bar"]);
        assert_eq!(f.history("foo").unwrap(), vec![Value::Int(1)]);
        assert_eq!(f.history("bar").unwrap(), vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_read_returns_first_value() {
        let f = Fact::new();
        f.set("foo", 42).unwrap();
        f.set("foo", 256).unwrap();
        assert_eq!(f.get("foo").unwrap(), Value::Int(42));
        assert_eq!(f.history("foo").unwrap().len(), 2);
    }

    #[test]
    fn test_keeps_values_unique() {
        let f = Fact::new();
        f.set("foo", 42).unwrap();
        f.set("foo", "Hello").unwrap();
        f.set("foo", 42).unwrap();
        assert_eq!(f.history("foo").unwrap().len(), 2);
    }

    #[test]
    fn test_fails_when_not_found() {
        let f = Fact::new();
        f.set("first", 42).unwrap();
        assert!(matches!(f.get("second"), Err(FactbaseError::NotFound(_))));
    }

    #[test]
    fn test_rejects_empty_values() {
        let f = Fact::new();
        assert!(f.set("foo", "").is_err());
        assert!(f.set_all("foo", vec![]).is_err());
        assert!(f.set("foo", f64::NAN).is_err());
        assert!(f.is_empty());
    }

    #[test]
    fn test_some_names_are_prohibited() {
        let f = Fact::new();
        assert!(f.set("to_s", 42).is_err());
        assert!(f.set("class", 42).is_err());
        assert!(f.set("Foo", 42).is_err());
        assert!(f.set("bad-name", 42).is_err());
        f.set("_foo_bar", 42).unwrap();
        f.set("seenBy", "me").unwrap();
        assert_eq!(f.get("_foo_bar").unwrap(), Value::Int(42));
    }

    #[test]
    fn test_time_in_utc() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let t = offset.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let f = Fact::new();
        f.set("foo", t).unwrap();
        assert_eq!(f.get("foo").unwrap(), Value::Time(t.with_timezone(&Utc)));
    }

    #[test]
    fn test_to_string() {
        let f = Fact::new();
        f.set("foo", 42).unwrap();
        assert_eq!(f.to_string(), "[ foo: [42] ]");
    }

    #[test]
    fn test_truncate_restores_history() {
        let mut props = Properties::default();
        let first = props.append("foo", Value::Int(1)).unwrap();
        let second = props.append("foo", Value::Int(2)).unwrap();
        props.truncate(&second);
        assert_eq!(props.get("foo").unwrap(), &vec![Value::Int(1)]);
        props.truncate(&first);
        assert!(props.get("foo").is_none());
    }

    struct Refuse;

    impl FactListener for Refuse {
        fn on_write(&self, _fact: &Fact, change: &Change) -> Result<()> {
            Err(FactbaseError::InvalidProperty(change.name.clone()))
        }
    }

    #[test]
    fn test_listener_error_undoes_write() {
        let f = Fact::new();
        f.set("foo", 1).unwrap();
        let watched = f.observed_by(Arc::new(Refuse));
        assert!(watched.set("foo", 2).is_err());
        assert!(watched.set("bar", 2).is_err());
        assert_eq!(f.history("foo").unwrap(), vec![Value::Int(1)]);
        assert_eq!(f.all_properties(), vec!["foo"]);
    }
}

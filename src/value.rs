//! The record tree (spec §3): scalars, plain objects, ordered sequences,
//! sets, maps, and three opaque leaf kinds (dates, regexes, big integers).
//!
//! `Value` is what travels through `Delta`'s path-addressed maps and what
//! `delta::apply` operates on. It is deliberately acyclic — the tracker
//! (`tracker.rs`) is the one place cycles are tolerated, and it works over
//! an arena of nodes rather than over `Value` directly; see that module's
//! doc comment for why.

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use regex::Regex;
use std::fmt;

/// The three leaf kinds the spec calls out as "opaque": assignment replaces
/// them wholesale, nothing ever recurses into their structure.
#[derive(Debug, Clone)]
pub enum Opaque {
    Date(DateTime<Utc>),
    Regex(OpaqueRegex),
    BigInt(BigInt),
}

/// `regex::Regex` doesn't implement `PartialEq`, so we carry the source
/// pattern alongside the compiled form and compare on that — two opaque
/// regex leaves are equal iff they were built from the same pattern string.
#[derive(Debug, Clone)]
pub struct OpaqueRegex {
    pub pattern: String,
    compiled: Regex,
}

impl OpaqueRegex {
    pub fn new(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let compiled = Regex::new(&pattern)?;
        Ok(OpaqueRegex { pattern, compiled })
    }

    pub fn as_regex(&self) -> &Regex {
        &self.compiled
    }
}

impl PartialEq for OpaqueRegex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Opaque::Date(a), Opaque::Date(b)) => a == b,
            (Opaque::Regex(a), Opaque::Regex(b)) => a == b,
            (Opaque::BigInt(a), Opaque::BigInt(b)) => a == b,
            _ => false,
        }
    }
}

/// A node in the record tree.
///
/// `Object` and `Map` keep insertion order (a `Vec` of pairs) rather than
/// hashing, both because JS object/Map iteration order is insertion order
/// and because it keeps `$set` snapshots of sorted/reversed sequences and
/// `sort()`/`reverse()` round-trips byte-for-byte comparable in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Opaque(Opaque),
}

impl Value {
    pub fn object(fields: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn as_object(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Vec<(String, Value)>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// True for the three opaque leaf kinds — assignment replaces them,
    /// nothing ever recurses into their structure (spec §3).
    pub fn is_opaque_leaf(&self) -> bool {
        matches!(self, Value::Opaque(_))
    }

    /// Get a field of an `Object` by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Set (insert-or-replace) a field of an `Object` in place. No-op on
    /// non-objects.
    pub fn set_field(&mut self, key: &str, value: Value) {
        if let Value::Object(fields) = self {
            if let Some(entry) = fields.iter_mut().find(|(k, _)| k == key) {
                entry.1 = value;
            } else {
                fields.push((key.to_string(), value));
            }
        }
    }

    /// Remove a field of an `Object` in place. No-op if absent or not an
    /// object (spec: "`$unset` on absent paths is a no-op").
    pub fn remove_field(&mut self, key: &str) {
        if let Value::Object(fields) = self {
            fields.retain(|(k, _)| k != key);
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Set(items) => write!(f, "Set({items:?})"),
            Value::Map(entries) => write!(f, "Map({entries:?})"),
            Value::Opaque(o) => write!(f, "{o:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_set_then_get_round_trips() {
        let mut v = Value::object([("foo", Value::str("bar"))]);
        v.set_field("foo", Value::str("baz"));
        assert_eq!(v.get("foo"), Some(&Value::str("baz")));
    }

    #[test]
    fn remove_absent_field_is_noop() {
        let mut v = Value::object::<&str>([]);
        v.remove_field("missing");
        assert_eq!(v, Value::object::<&str>([]));
    }

    #[test]
    fn opaque_regex_equality_is_by_pattern() {
        let a = OpaqueRegex::new("a+").unwrap();
        let b = OpaqueRegex::new("a+").unwrap();
        assert_eq!(a, b);
    }
}

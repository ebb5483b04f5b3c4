//! Type system for APEX

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Core value type in APEX
///
/// Every fact variable, expression result, dataset cell, and enrichment
/// output is one of these tagged variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Fixed-point decimal for currency-magnitude arithmetic
    Decimal(Decimal),
    /// String value
    String(Arc<str>),
    /// Sequence of values
    List(Arc<[Value]>),
    /// Mapping of string keys to values
    Map(Arc<BTreeMap<String, Value>>),
    /// Point in time (UTC)
    DateTime(DateTime<Utc>),
    /// Signed span of time
    Duration(Duration),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Arc::from(s.into().into_boxed_str()))
    }

    /// Create a list value
    pub fn list(values: Vec<Value>) -> Self {
        Value::List(Arc::from(values.into_boxed_slice()))
    }

    /// Create a map value
    pub fn map(map: BTreeMap<String, Value>) -> Self {
        Value::Map(Arc::new(map))
    }

    /// Check if value is truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Decimal(d) => !d.is_zero(),
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::DateTime(_) | Value::Duration(_) => true,
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Coerce to bool; null is false, other variants use truthiness
    pub fn as_bool(&self) -> bool {
        self.is_truthy()
    }

    /// View as a decimal if the value is numeric
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// View as an i64 if the value is an integral number
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    /// View as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable rendering used in messages and routing keys
    pub fn render(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::String(s) => s.to_string(),
            Value::List(l) => {
                let items: Vec<String> = l.iter().map(Value::render).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Map(m) => {
                let items: Vec<String> = m.iter().map(|(k, v)| format!("{}: {}", k, v.render())).collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::DateTime(dt) => dt.to_rfc3339(),
            Value::Duration(d) => format!("{}ms", d.num_milliseconds()),
        }
    }

    /// Type name used in coercion error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::DateTime(_) => "datetime",
            Value::Duration(_) => "duration",
        }
    }

    /// Semantic equality: numerics compare across Int/Decimal
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                self.as_decimal() == other.as_decimal()
            }
            (a, b) => a == b,
        }
    }

    /// Semantic ordering for comparison operators; None when incomparable
    pub fn loose_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                self.as_decimal()?.partial_cmp(&other.as_decimal()?)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
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

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Decimal(d) => Serialize::serialize(d, serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(l) => {
                let mut seq = serializer.serialize_seq(Some(l.len()))?;
                for v in l.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::DateTime(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            Value::Duration(d) => serializer.serialize_i64(d.num_milliseconds()),
        }
    }
}

/// Convert a parsed YAML node into a tagged value.
///
/// Integral numbers become `Int`; fractional numbers become `Decimal` so
/// currency magnitudes survive without float drift.
pub fn from_yaml(node: &serde_yaml::Value) -> Value {
    match node {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Ok(d) = n.to_string().parse::<Decimal>() {
                // The display form carries the intended scale ("0.9"), which
                // the raw f64 bits do not.
                Value::Decimal(d)
            } else if let Some(f) = n.as_f64() {
                Decimal::from_f64_retain(f).map(Value::Decimal).unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        }
        serde_yaml::Value::String(s) => Value::string(s.clone()),
        serde_yaml::Value::Sequence(seq) => Value::list(seq.iter().map(from_yaml).collect()),
        serde_yaml::Value::Mapping(m) => {
            let mut out = BTreeMap::new();
            for (k, v) in m {
                if let Some(key) = k.as_str() {
                    out.insert(key.to_string(), from_yaml(v));
                }
            }
            Value::map(out)
        }
        serde_yaml::Value::Tagged(tagged) => from_yaml(&tagged.value),
    }
}

/// Variable environment presented to expression evaluation.
pub type FactContext = BTreeMap<String, Value>;

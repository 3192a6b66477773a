use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value stored in a stage context or carried through edge history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    #[default]
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<ContextValue>),
    Map(BTreeMap<String, ContextValue>),
    /// In-process only; never crosses a worker boundary or a checkpoint.
    #[serde(skip)]
    Opaque(OpaqueValue),
}

/// Type-erased handle for values that cannot be serialized.
#[derive(Clone)]
pub struct OpaqueValue(Arc<dyn Any + Send + Sync>);

impl OpaqueValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpaqueValue")
    }
}

impl PartialEq for OpaqueValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl ContextValue {
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        ContextValue::Opaque(OpaqueValue::new(value))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ContextValue::None => "none",
            ContextValue::Bool(_) => "bool",
            ContextValue::Integer(_) => "integer",
            ContextValue::Float(_) => "float",
            ContextValue::String(_) => "string",
            ContextValue::Bytes(_) => "bytes",
            ContextValue::List(_) => "list",
            ContextValue::Map(_) => "map",
            ContextValue::Opaque(_) => "opaque",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ContextValue::None)
    }

    /// True when the value (recursively) contains nothing in-process only.
    pub fn is_serializable(&self) -> bool {
        match self {
            ContextValue::Opaque(_) => false,
            ContextValue::List(items) => items.iter().all(ContextValue::is_serializable),
            ContextValue::Map(map) => map.values().all(ContextValue::is_serializable),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ContextValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ContextValue::Integer(i) => Some(*i),
            ContextValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ContextValue::Integer(i) => Some(*i as f64),
            ContextValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ContextValue::Bytes(b) => Some(b),
            ContextValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ContextValue]> {
        match self {
            ContextValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ContextValue>> {
        match self {
            ContextValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_opaque<T: Any>(&self) -> Option<&T> {
        match self {
            ContextValue::Opaque(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Truthiness used by condition hooks that return non-boolean values.
    pub fn is_truthy(&self) -> bool {
        match self {
            ContextValue::None => false,
            ContextValue::Bool(b) => *b,
            ContextValue::Integer(i) => *i != 0,
            ContextValue::Float(f) => *f != 0.0,
            ContextValue::String(s) => !s.is_empty(),
            ContextValue::Bytes(b) => !b.is_empty(),
            ContextValue::List(items) => !items.is_empty(),
            ContextValue::Map(map) => !map.is_empty(),
            ContextValue::Opaque(_) => true,
        }
    }

    /// Plain JSON view. Bytes become arrays of numbers and opaque values become null.
    pub fn to_json(&self) -> Value {
        match self {
            ContextValue::None | ContextValue::Opaque(_) => Value::Null,
            ContextValue::Bool(b) => Value::Bool(*b),
            ContextValue::Integer(i) => Value::from(*i),
            ContextValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ContextValue::String(s) => Value::String(s.clone()),
            ContextValue::Bytes(bytes) => {
                Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
            }
            ContextValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            ContextValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ContextValue::None,
            Value::Bool(b) => ContextValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ContextValue::Integer(i),
                None => ContextValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => ContextValue::String(s.clone()),
            Value::Array(items) => {
                ContextValue::List(items.iter().map(ContextValue::from_json).collect())
            }
            Value::Object(map) => ContextValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), ContextValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Stores any serializable record (actions, results, metrics) as a plain value tree.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(ContextValue::from_json(&serde_json::to_value(value)?))
    }

    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_json())
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Integer(value)
    }
}

impl From<i32> for ContextValue {
    fn from(value: i32) -> Self {
        ContextValue::Integer(value as i64)
    }
}

impl From<u64> for ContextValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(ContextValue::Integer)
            .unwrap_or(ContextValue::Float(value as f64))
    }
}

impl From<usize> for ContextValue {
    fn from(value: usize) -> Self {
        ContextValue::from(value as u64)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Float(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::String(value)
    }
}

impl From<Vec<ContextValue>> for ContextValue {
    fn from(value: Vec<ContextValue>) -> Self {
        ContextValue::List(value)
    }
}

impl From<BTreeMap<String, ContextValue>> for ContextValue {
    fn from(value: BTreeMap<String, ContextValue>) -> Self {
        ContextValue::Map(value)
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        ContextValue::from_json(&value)
    }
}

//! Values exchanged with the execution service and held in a session store.
//!
//! Script values are dynamically typed on the far side of the service
//! boundary, so on this side they are a closed tagged union. Store keys are a
//! separate, hashable subset of that union: floats, maps and opaque objects
//! cannot be keys.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Rendering used wherever an absent value is printed.
pub const NULL_TEXT: &str = "<NULL>";

/// A dynamically typed script value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Growable ordered sequence.
    List(Vec<Value>),
    /// Fixed-length ordered sequence.
    Array(Vec<Value>),
    /// Fixed-arity heterogeneous group.
    Tuple(Vec<Value>),
    /// Insertion-ordered associative value.
    #[serde(with = "map_pairs")]
    Map(IndexMap<Key, Value>),
    /// A resolved type, as produced by `typeof(..)`.
    Type(String),
    /// Anything the service cannot express structurally.
    Object {
        /// Runtime type name reported by the service.
        type_name: String,
        /// The service's string rendering of the object.
        repr: String,
    },
}

impl Value {
    /// Returns the runtime type name used for member descriptions.
    ///
    /// `Null` has no runtime type and yields `None`.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        Some(match self {
            Self::Null => return None,
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "double",
            Self::Str(_) => "string",
            Self::List(_) => "List",
            Self::Array(_) => "Array",
            Self::Tuple(_) => "ValueTuple",
            Self::Map(_) => "Dictionary",
            Self::Type(_) => "Type",
            Self::Object { type_name, .. } => type_name,
        })
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Splits a composite (tuple-like or iterable) value into its elements.
    ///
    /// Strings and maps are not treated as composites: assigning either to
    /// several keys broadcasts the whole value.
    pub fn into_elements(self) -> Result<Vec<Self>, Self> {
        match self {
            Self::List(items) | Self::Array(items) | Self::Tuple(items) => Ok(items),
            other => Err(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(NULL_TEXT),
            Self::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => write!(f, "List[{}]", join(items)),
            Self::Array(items) => write!(f, "Array[{}]", join(items)),
            Self::Tuple(items) => write!(f, "({})", join(items)),
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "[{k}, {v}]")?;
                }
                f.write_str("}")
            }
            Self::Type(name) => f.write_str(name),
            Self::Object { repr, .. } => f.write_str(repr),
        }
    }
}

fn join(items: &[Value]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A hashable store key.
///
/// `Key::Null` is the sentinel standing in for an absent key, so the store
/// never holds a literal null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Key {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Tuple(Vec<Key>),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(NULL_TEXT),
            Self::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
            Self::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<Self>> From<Option<T>> for Key {
    fn from(key: Option<T>) -> Self {
        key.map_or(Self::Null, Into::into)
    }
}

impl TryFrom<Value> for Key {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Int(i) => Self::Int(i),
            Value::Str(s) => Self::Str(s),
            Value::Tuple(items) => Self::Tuple(items.into_iter().map(Self::try_from).collect::<Result<_, _>>()?),
            other => {
                return Err(StoreError::UnhashableKey(
                    other.type_name().unwrap_or("null").to_owned(),
                ));
            }
        })
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Null => Self::Null,
            Key::Bool(b) => Self::Bool(b),
            Key::Int(i) => Self::Int(i),
            Key::Str(s) => Self::Str(s),
            Key::Tuple(items) => Self::Tuple(items.into_iter().map(Self::from).collect()),
        }
    }
}

/// Serializes an `IndexMap<Key, Value>` as a sequence of pairs, since keys
/// are not strings and most wire formats only allow string map keys.
mod map_pairs {
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{Key, Value};

    pub(super) fn serialize<S: Serializer>(map: &IndexMap<Key, Value>, serializer: S) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&Key, &Value)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<IndexMap<Key, Value>, D::Error> {
        let pairs = Vec::<(Key, Value)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

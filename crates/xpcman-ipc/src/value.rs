//! The closed value universe carried by every message.
//!
//! [`Dictionary`] keeps keys unique and iterates in insertion order so that
//! rendered output matches the order in which a payload was built or
//! received. [`Value`] is an exhaustive sum type; there is no escape hatch for
//! arbitrary native objects.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::ser::{Serialize, Serializer};
use uuid::Uuid;

use crate::codec::KeyPath;
use crate::error::IpcError;

/// Opaque typed wrappers for domain-specific native handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    /// A file descriptor transferred with the message.
    ///
    /// A received descriptor is a duplicate owned by the receiver, which must
    /// close it. Sending one leaves the caller's descriptor open; the native
    /// layer transfers its own duplicate.
    FileDescriptor(i32),
    /// A 128-bit universally unique identifier.
    Uuid(Uuid),
}

/// A single message value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    Uint64(u64),
    /// Double-precision float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Data(Vec<u8>),
    /// Nested dictionary.
    Dictionary(Dictionary),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Native handle.
    Handle(Handle),
}

impl Value {
    /// Short name of the value kind, used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Int64(_) => "int64",
            Self::Uint64(_) => "uint64",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Data(_) => "data",
            Self::Dictionary(_) => "dictionary",
            Self::Array(_) => "array",
            Self::Handle(Handle::FileDescriptor(_)) => "fd",
            Self::Handle(Handle::Uuid(_)) => "uuid",
        }
    }

    /// Returns the signed integer payload.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the unsigned integer payload.
    #[must_use]
    pub const fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint64(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the boolean payload.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the string payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the nested dictionary.
    #[must_use]
    pub const fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Self::Dictionary(value) => Some(value),
            _ => None,
        }
    }

    fn from_json(value: serde_json::Value, path: &KeyPath) -> Result<Self, IpcError> {
        match value {
            serde_json::Value::Null => Err(IpcError::InvalidArgument {
                reason: format!("null is not a supported value at {path}"),
            }),
            serde_json::Value::Bool(flag) => Ok(Self::Bool(flag)),
            serde_json::Value::Number(number) => {
                if let Some(signed) = number.as_i64() {
                    Ok(Self::Int64(signed))
                } else if let Some(unsigned) = number.as_u64() {
                    Ok(Self::Uint64(unsigned))
                } else {
                    number
                        .as_f64()
                        .map(Self::Double)
                        .ok_or_else(|| IpcError::InvalidArgument {
                            reason: format!("number {number} at {path} is not representable"),
                        })
                }
            }
            serde_json::Value::String(text) => Ok(Self::String(text)),
            serde_json::Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| Self::from_json(item, &path.index(index)))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Array),
            serde_json::Value::Object(map) => {
                Dictionary::from_json_map(map, path).map(Self::Dictionary)
            }
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    i64 => Int64,
    i32 => Int64,
    u64 => Uint64,
    u32 => Uint64,
    f64 => Double,
    bool => Bool,
    String => String,
    &str => String,
    Vec<u8> => Data,
    Dictionary => Dictionary,
    Vec<Value> => Array,
    Handle => Handle,
}

/// Ordered, key-unique map from string keys to [`Value`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: Vec<(String, Value)>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts a value, returning the previous value for the key.
    ///
    /// An existing key keeps its position; only its value is replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Looks up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Looks up a string value by key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let position = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(position).1)
    }

    /// Returns `true` when the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the dictionary has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    /// Iterates over keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Converts a JSON object into a dictionary.
    ///
    /// Integers become [`Value::Int64`] when they fit and [`Value::Uint64`]
    /// otherwise; any other number becomes [`Value::Double`]. JSON `null` has
    /// no counterpart in the value universe and is rejected with the key path
    /// where it appeared.
    pub fn from_json(value: serde_json::Value) -> Result<Self, IpcError> {
        match value {
            serde_json::Value::Object(map) => Self::from_json_map(map, &KeyPath::root()),
            other => Err(IpcError::InvalidArgument {
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    fn from_json_map(
        map: serde_json::Map<String, serde_json::Value>,
        path: &KeyPath,
    ) -> Result<Self, IpcError> {
        let mut dictionary = Self::new();
        for (key, item) in map {
            let value = Value::from_json(item, &path.key(&key))?;
            dictionary.insert(key, value);
        }
        Ok(dictionary)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

impl IntoIterator for Dictionary {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Dictionary
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dictionary = Self::new();
        for (key, value) in iter {
            dictionary.insert(key, value);
        }
        dictionary
    }
}

impl Serialize for Handle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::FileDescriptor(fd) => serializer.serialize_i32(*fd),
            Self::Uuid(uuid) => serializer.collect_str(&uuid.hyphenated()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int64(value) => serializer.serialize_i64(*value),
            Self::Uint64(value) => serializer.serialize_u64(*value),
            Self::Double(value) => serializer.serialize_f64(*value),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::String(value) => serializer.serialize_str(value),
            Self::Data(bytes) => serializer.serialize_str(&BASE64_STANDARD.encode(bytes)),
            Self::Dictionary(dictionary) => dictionary.serialize(serializer),
            Self::Array(items) => serializer.collect_seq(items),
            Self::Handle(handle) => handle.serialize(serializer),
        }
    }
}

impl Serialize for Dictionary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(key, value)| (key, value)))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileDescriptor(fd) => write!(formatter, "fd({fd})"),
            Self::Uuid(uuid) => write!(formatter, "uuid({})", uuid.hyphenated()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(value) => write!(formatter, "{value}"),
            Self::Uint64(value) => write!(formatter, "{value}"),
            Self::Double(value) => write!(formatter, "{value}"),
            Self::Bool(value) => write!(formatter, "{value}"),
            Self::String(value) => write!(formatter, "{value:?}"),
            Self::Data(bytes) => write!(formatter, "<{} bytes>", bytes.len()),
            Self::Dictionary(dictionary) => write!(formatter, "{dictionary}"),
            Self::Array(items) => {
                formatter.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        formatter.write_str(", ")?;
                    }
                    write!(formatter, "{item}")?;
                }
                formatter.write_str("]")
            }
            Self::Handle(handle) => write!(formatter, "{handle}"),
        }
    }
}

impl fmt::Display for Dictionary {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("{")?;
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                formatter.write_str(", ")?;
            }
            write!(formatter, "{key}: {value}")?;
        }
        formatter.write_str("}")
    }
}

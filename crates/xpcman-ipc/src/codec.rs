//! Conversion between [`Dictionary`] values and native objects.
//!
//! Every [`Value`] has a native counterpart, but native keys and strings are
//! NUL-terminated, so [`check_encodable`] runs before a payload is sent.
//! Decoding is partial: native kinds outside the value universe are reported per key path
//! while the remaining keys still decode.

use std::fmt;

use uuid::Uuid;

use crate::error::IpcError;
use crate::native::NativeObject;
use crate::value::{Dictionary, Handle, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Location of a value inside a nested payload, such as `outer.inner[2]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPath {
    segments: Vec<Segment>,
}

impl KeyPath {
    /// The payload root.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Returns `true` for the payload root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path of a dictionary key below this path.
    #[must_use]
    pub fn key(&self, key: &str) -> Self {
        self.child(Segment::Key(key.to_owned()))
    }

    /// Path of an array element below this path.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.child(Segment::Index(index))
    }

    fn child(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return formatter.write_str("<root>");
        }
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if position == 0 => formatter.write_str(key)?,
                Segment::Key(key) => write!(formatter, ".{key}")?,
                Segment::Index(index) => write!(formatter, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Why a native value could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeReason {
    /// The native kind has no counterpart in the value universe.
    UnsupportedType,
    /// A dictionary was required at this position.
    NotADictionary,
}

impl fmt::Display for DecodeReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::UnsupportedType => "unsupported native type",
            Self::NotADictionary => "expected a dictionary but found",
        })
    }
}

/// A single decode failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason} `{type_name}` at {path}")]
pub struct DecodeError {
    /// Where the failure occurred.
    pub path: KeyPath,
    /// Native type name of the offending value.
    pub type_name: String,
    /// Failure category.
    pub reason: DecodeReason,
}

/// Result of a decode that could not represent every key.
///
/// `partial` holds every key that decoded successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialDecode {
    /// Successfully decoded entries.
    pub partial: Dictionary,
    /// One entry per value that could not be decoded.
    pub errors: Vec<DecodeError>,
}

impl fmt::Display for PartialDecode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} value(s) could not be decoded", self.errors.len())?;
        for error in &self.errors {
            write!(formatter, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialDecode {}

/// Checks that every key and string in `dictionary` can cross the native
/// boundary unchanged.
///
/// # Errors
///
/// Returns [`IpcError::InvalidArgument`] naming the first key path whose key
/// or string value contains a NUL byte.
pub fn check_encodable(dictionary: &Dictionary) -> Result<(), IpcError> {
    check_entries(dictionary, &KeyPath::root())
}

fn check_entries(dictionary: &Dictionary, path: &KeyPath) -> Result<(), IpcError> {
    for (key, value) in dictionary.iter() {
        let child = path.key(key);
        if key.contains('\0') {
            return Err(nul_byte("key", &child));
        }
        check_value(value, &child)?;
    }
    Ok(())
}

fn check_value(value: &Value, path: &KeyPath) -> Result<(), IpcError> {
    match value {
        Value::String(text) if text.contains('\0') => Err(nul_byte("string", path)),
        Value::Dictionary(dictionary) => check_entries(dictionary, path),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(index, item)| check_value(item, &path.index(index))),
        _ => Ok(()),
    }
}

fn nul_byte(what: &str, path: &KeyPath) -> IpcError {
    IpcError::invalid_argument(format!("{what} at `{path}` contains a NUL byte"))
}

/// Encodes a dictionary into its native form.
#[must_use]
pub fn encode(dictionary: Dictionary) -> NativeObject {
    NativeObject::Dictionary(
        dictionary
            .into_iter()
            .map(|(key, value)| (key, encode_value(value)))
            .collect(),
    )
}

fn encode_value(value: Value) -> NativeObject {
    match value {
        Value::Int64(value) => NativeObject::Int64(value),
        Value::Uint64(value) => NativeObject::Uint64(value),
        Value::Double(value) => NativeObject::Double(value),
        Value::Bool(value) => NativeObject::Bool(value),
        Value::String(value) => NativeObject::String(value),
        Value::Data(bytes) => NativeObject::Data(bytes),
        Value::Dictionary(dictionary) => encode(dictionary),
        Value::Array(items) => NativeObject::Array(items.into_iter().map(encode_value).collect()),
        Value::Handle(Handle::FileDescriptor(fd)) => NativeObject::FileDescriptor(fd),
        Value::Handle(Handle::Uuid(uuid)) => NativeObject::Uuid(uuid.into_bytes()),
    }
}

/// Decodes a native dictionary.
///
/// # Errors
///
/// Returns [`PartialDecode`] when the root is not a dictionary or when any
/// nested value has an unsupported native type. Unsupported array elements
/// are omitted from the partial array.
pub fn decode(object: NativeObject) -> Result<Dictionary, PartialDecode> {
    let mut errors = Vec::new();
    let root = KeyPath::root();
    let dictionary = match object {
        NativeObject::Dictionary(entries) => decode_entries(entries, &root, &mut errors),
        other => {
            errors.push(DecodeError {
                path: root,
                type_name: other.type_name().to_owned(),
                reason: DecodeReason::NotADictionary,
            });
            Dictionary::new()
        }
    };

    if errors.is_empty() {
        Ok(dictionary)
    } else {
        Err(PartialDecode {
            partial: dictionary,
            errors,
        })
    }
}

fn decode_entries(
    entries: Vec<(String, NativeObject)>,
    path: &KeyPath,
    errors: &mut Vec<DecodeError>,
) -> Dictionary {
    let mut dictionary = Dictionary::new();
    for (key, object) in entries {
        let child = path.key(&key);
        if let Some(value) = decode_value(object, &child, errors) {
            dictionary.insert(key, value);
        }
    }
    dictionary
}

fn decode_value(
    object: NativeObject,
    path: &KeyPath,
    errors: &mut Vec<DecodeError>,
) -> Option<Value> {
    let value = match object {
        NativeObject::Int64(value) => Value::Int64(value),
        NativeObject::Uint64(value) => Value::Uint64(value),
        NativeObject::Double(value) => Value::Double(value),
        NativeObject::Bool(value) => Value::Bool(value),
        NativeObject::String(value) => Value::String(value),
        NativeObject::Data(bytes) => Value::Data(bytes),
        NativeObject::Dictionary(entries) => {
            Value::Dictionary(decode_entries(entries, path, errors))
        }
        NativeObject::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .filter_map(|(index, item)| decode_value(item, &path.index(index), errors))
                .collect(),
        ),
        NativeObject::FileDescriptor(fd) => Value::Handle(Handle::FileDescriptor(fd)),
        NativeObject::Uuid(bytes) => Value::Handle(Handle::Uuid(Uuid::from_bytes(bytes))),
        NativeObject::Unsupported { type_name } => {
            errors.push(DecodeError {
                path: path.clone(),
                type_name,
                reason: DecodeReason::UnsupportedType,
            });
            return None;
        }
    };
    Some(value)
}

//! `DynamicValue` codec.
//!
//! Terraform sends configuration as msgpack-encoded cty values. Values that
//! are not yet known during planning arrive as msgpack extension type 0.
//! Decoding yields an [`rmpv::Value`] tree that is read through
//! [`ObjectView`]; encoding goes straight from serde types.

use rmpv::Value;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::proto::DynamicValue;

/// Msgpack extension type Terraform uses for unknown values.
pub const UNKNOWN_EXT_TYPE: i8 = 0;

/// msgpack `nil`.
const MSGPACK_NIL: u8 = 0xc0;

/// Marker msgpack reserves; rmpv reads it as `nil`.
const MSGPACK_RESERVED: u8 = 0xc1;

impl DynamicValue {
    /// Encodes a serde value as msgpack, with struct fields as map keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self {
            msgpack: rmp_serde::to_vec_named(value)?,
            json: Vec::new(),
        })
    }

    /// A null value.
    #[must_use]
    pub fn null() -> Self {
        Self {
            msgpack: vec![MSGPACK_NIL],
            json: Vec::new(),
        }
    }

    /// Decodes the value, preferring msgpack and falling back to JSON.
    ///
    /// An entirely empty value decodes as null.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid msgpack or JSON, or if
    /// bytes remain after the msgpack value.
    pub fn decode(&self) -> Result<Value> {
        if !self.msgpack.is_empty() {
            return decode_msgpack(&self.msgpack);
        }
        if !self.json.is_empty() {
            let json: serde_json::Value = serde_json::from_slice(&self.json)?;
            return rmpv::ext::to_value(json).map_err(|e| Error::MsgPack(e.to_string()));
        }
        Ok(Value::Nil)
    }
}

fn decode_msgpack(bytes: &[u8]) -> Result<Value> {
    if bytes.first() == Some(&MSGPACK_RESERVED) {
        return Err(Error::MsgPack("reserved marker 0xc1".to_string()));
    }
    let mut cursor = bytes;
    let value = rmpv::decode::read_value(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(Error::MsgPack(format!(
            "{} trailing bytes after value",
            cursor.len()
        )));
    }
    Ok(value)
}

/// Decodes an optional wire value; a missing value is null.
///
/// # Errors
///
/// Returns an error if the payload cannot be decoded.
pub fn decode(value: Option<&DynamicValue>) -> Result<Value> {
    value.map_or(Ok(Value::Nil), DynamicValue::decode)
}

/// Returns true for Terraform's unknown marker.
#[must_use]
pub fn is_unknown(value: &Value) -> bool {
    matches!(value, Value::Ext(UNKNOWN_EXT_TYPE, _))
}

/// An attribute read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue<T> {
    /// Not set.
    Null,
    /// Set, but only known after apply.
    Unknown,
    /// Set and known.
    Known(T),
}

impl<T> AttrValue<T> {
    /// The known value, if any.
    pub fn known(self) -> Option<T> {
        match self {
            Self::Known(value) => Some(value),
            Self::Null | Self::Unknown => None,
        }
    }

    /// Returns true when the value is unknown.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Read access to a decoded cty object.
#[derive(Debug, Clone)]
pub struct ObjectView<'a> {
    path: String,
    entries: &'a [(Value, Value)],
}

impl<'a> ObjectView<'a> {
    /// Views a decoded value as an object. Null yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is neither null nor a map.
    pub fn new(value: &'a Value) -> Result<Option<Self>> {
        Self::at(String::new(), value)
    }

    fn at(path: String, value: &'a Value) -> Result<Option<Self>> {
        match value {
            Value::Nil => Ok(None),
            Value::Map(entries) => Ok(Some(Self { path, entries })),
            _ if is_unknown(value) => Err(Error::invalid_value(
                display_path(&path),
                "object is not known yet",
            )),
            _ => Err(Error::invalid_value(display_path(&path), "expected an object")),
        }
    }

    /// Dotted path of this object inside the root value.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw attribute lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(key, _)| key.as_str() == Some(name))
            .map(|(_, value)| value)
    }

    /// Reads a string attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute holds something other than a string.
    pub fn string(&self, name: &str) -> Result<AttrValue<String>> {
        match self.get(name) {
            None | Some(Value::Nil) => Ok(AttrValue::Null),
            Some(value) if is_unknown(value) => Ok(AttrValue::Unknown),
            Some(Value::String(s)) => s.as_str().map_or_else(
                || Err(Error::invalid_value(self.child_path(name), "invalid UTF-8")),
                |s| Ok(AttrValue::Known(s.to_string())),
            ),
            Some(_) => Err(Error::invalid_value(self.child_path(name), "expected a string")),
        }
    }

    /// Reads a known string attribute, treating null and unknown as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute holds something other than a string.
    pub fn optional_string(&self, name: &str) -> Result<Option<String>> {
        Ok(self.string(name)?.known())
    }

    /// Reads a list or set of nested blocks. A null collection is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is not a collection of objects.
    pub fn blocks(&self, name: &str) -> Result<AttrValue<Vec<Self>>> {
        let path = self.child_path(name);
        match self.get(name) {
            None | Some(Value::Nil) => Ok(AttrValue::Known(Vec::new())),
            Some(value) if is_unknown(value) => Ok(AttrValue::Unknown),
            Some(Value::Array(items)) => {
                let mut blocks = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    if is_unknown(item) {
                        return Ok(AttrValue::Unknown);
                    }
                    if let Some(block) = Self::at(format!("{path}.{index}"), item)? {
                        blocks.push(block);
                    }
                }
                Ok(AttrValue::Known(blocks))
            }
            Some(_) => Err(Error::invalid_value(path, "expected a list of blocks")),
        }
    }

    fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.path)
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "(root)" } else { path }
}

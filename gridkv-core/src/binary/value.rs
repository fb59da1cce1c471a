//! The binary object model exchanged with the cluster.
//!
//! A [`Value`] is written to the wire as a one-byte type code followed by the
//! type's payload. Composite values come in two forms: [`ComplexObject`] is
//! the structured form with named fields that callers build, and
//! [`BinaryObject`] is the marshalled form with hashed field ids that comes
//! off the wire. A complex object is converted to its binary form before
//! serialization, so field access on received values is always by field id.

use uuid::Uuid;

use crate::binary::hash::{field_id, type_id};
use crate::binary::{BinaryReader, BinaryWriter};
use crate::error::{GridError, Result};
use crate::protocol::constants::*;

/// A single value in the binary object model.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 8-bit integer.
    I8(i8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// 16-byte UUID.
    Uuid(Uuid),
    /// Raw byte array.
    Bytes(Vec<u8>),
    /// Structured object with named fields (marshalled on write).
    Complex(ComplexObject),
    /// Marshalled object with hashed field ids.
    Binary(BinaryObject),
}

impl Value {
    /// Returns the wire type code of this value.
    pub fn type_code(&self) -> i8 {
        match self {
            Value::I8(_) => TYPE_BYTE,
            Value::I16(_) => TYPE_SHORT,
            Value::I32(_) => TYPE_INT,
            Value::I64(_) => TYPE_LONG,
            Value::F32(_) => TYPE_FLOAT,
            Value::F64(_) => TYPE_DOUBLE,
            Value::Bool(_) => TYPE_BOOL,
            Value::String(_) => TYPE_STRING,
            Value::Uuid(_) => TYPE_UUID,
            Value::Bytes(_) => TYPE_BYTE_ARRAY,
            Value::Complex(_) => TYPE_COMPLEX_OBJECT,
            Value::Binary(_) => TYPE_BINARY_OBJECT,
        }
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::I8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<ComplexObject> for Value {
    fn from(v: ComplexObject) -> Self {
        Value::Complex(v)
    }
}

impl From<BinaryObject> for Value {
    fn from(v: BinaryObject) -> Self {
        Value::Binary(v)
    }
}

/// A structured object with a type name and named fields.
///
/// Field order is preserved; it determines the marshalled layout and
/// therefore the object's content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexObject {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl ComplexObject {
    /// Creates an object of the given type with no fields.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds or replaces a field, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Adds or replaces a field.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    /// Returns a field's value by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns the type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the hashed type id derived from the type name.
    pub fn type_id(&self) -> i32 {
        type_id(&self.type_name)
    }

    /// Marshals this object into its binary form with hashed field ids.
    pub fn to_binary(&self) -> BinaryObject {
        BinaryObject {
            type_id: self.type_id(),
            fields: self
                .fields
                .iter()
                .map(|(name, value)| (field_id(name), value.clone()))
                .collect(),
        }
    }
}

/// A marshalled object: a type id and fields keyed by hashed field id.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryObject {
    type_id: i32,
    fields: Vec<(i32, Value)>,
}

impl BinaryObject {
    /// Creates a binary object from a type id and field list.
    pub fn new(type_id: i32, fields: Vec<(i32, Value)>) -> Self {
        Self { type_id, fields }
    }

    /// Returns the type id.
    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    /// Returns a field's value by hashed field id.
    pub fn field_by_id(&self, id: i32) -> Option<&Value> {
        self.fields.iter().find(|(fid, _)| *fid == id).map(|(_, v)| v)
    }

    /// Returns the fields in marshalled order.
    pub fn fields(&self) -> &[(i32, Value)] {
        &self.fields
    }
}

/// Writes a value as a type code followed by its payload.
pub fn write_object(w: &mut BinaryWriter, value: &Value) {
    w.write_i8(value.type_code());
    match value {
        Value::I8(v) => w.write_i8(*v),
        Value::I16(v) => w.write_i16(*v),
        Value::I32(v) => w.write_i32(*v),
        Value::I64(v) => w.write_i64(*v),
        Value::F32(v) => w.write_f32(*v),
        Value::F64(v) => w.write_f64(*v),
        Value::Bool(v) => w.write_bool(*v),
        Value::String(v) => w.write_string(v),
        Value::Uuid(v) => w.write_uuid(v),
        Value::Bytes(v) => w.write_bytes(v),
        Value::Complex(v) => write_object_body(w, &v.to_binary()),
        Value::Binary(v) => write_object_body(w, v),
    }
}

/// Writes an optional value; `None` becomes the null type code.
pub fn write_object_nullable(w: &mut BinaryWriter, value: Option<&Value>) {
    match value {
        Some(v) => write_object(w, v),
        None => w.write_i8(TYPE_NULL),
    }
}

pub(crate) fn write_object_body(w: &mut BinaryWriter, obj: &BinaryObject) {
    w.write_i32(obj.type_id);
    w.write_i32(obj.fields.len() as i32);
    for (id, value) in &obj.fields {
        w.write_i32(*id);
        write_object(w, value);
    }
}

/// Reads a value written by [`write_object`].
///
/// Composite payloads always come back in binary form; a null marker is an
/// error here (use [`read_object_nullable`] where null is legal).
pub fn read_object(r: &mut BinaryReader) -> Result<Value> {
    match read_object_nullable(r)? {
        Some(value) => Ok(value),
        None => Err(GridError::Serialization(
            "unexpected null where a value is required".to_string(),
        )),
    }
}

/// Reads an optional value written by [`write_object_nullable`].
pub fn read_object_nullable(r: &mut BinaryReader) -> Result<Option<Value>> {
    let code = r.read_i8()?;
    let value = match code {
        TYPE_NULL => return Ok(None),
        TYPE_BYTE => Value::I8(r.read_i8()?),
        TYPE_SHORT => Value::I16(r.read_i16()?),
        TYPE_INT => Value::I32(r.read_i32()?),
        TYPE_LONG => Value::I64(r.read_i64()?),
        TYPE_FLOAT => Value::F32(r.read_f32()?),
        TYPE_DOUBLE => Value::F64(r.read_f64()?),
        TYPE_BOOL => Value::Bool(r.read_bool()?),
        TYPE_STRING => Value::String(r.read_string()?),
        TYPE_UUID => Value::Uuid(r.read_uuid()?),
        TYPE_BYTE_ARRAY => Value::Bytes(r.read_bytes()?),
        TYPE_COMPLEX_OBJECT | TYPE_BINARY_OBJECT => Value::Binary(read_object_body(r)?),
        other => {
            return Err(GridError::Serialization(format!(
                "unknown type code {}",
                other
            )))
        }
    };
    Ok(Some(value))
}

fn read_object_body(r: &mut BinaryReader) -> Result<BinaryObject> {
    let type_id = r.read_i32()?;
    let field_count = r.read_i32()?;
    if field_count < 0 {
        return Err(GridError::Serialization(format!(
            "negative field count {}",
            field_count
        )));
    }
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let id = r.read_i32()?;
        let value = read_object(r)?;
        fields.push((id, value));
    }
    Ok(BinaryObject { type_id, fields })
}

//! Key and identifier hashing.
//!
//! The cluster derives partition placement, type ids, and field ids from
//! 32-bit hashes computed on the client. These functions must produce exactly
//! the values the server computes for the same input, so the arithmetic is
//! pinned to wrapping 32-bit operations throughout.

use crate::binary::value::{write_object_body, BinaryObject, Value};
use crate::binary::BinaryWriter;
use crate::protocol::constants::*;

/// 31-based rolling hash over the string's UTF-16 code units.
pub fn string_hash(s: &str) -> i32 {
    let mut h: i32 = 0;
    for unit in s.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(unit as i32);
    }
    h
}

/// Hashed type id for a type name (case-insensitive).
pub fn type_id(name: &str) -> i32 {
    string_hash(&name.to_lowercase())
}

/// Hashed field id for a field name (case-insensitive).
pub fn field_id(name: &str) -> i32 {
    string_hash(&name.to_lowercase())
}

/// 32-bit FNV-1a over raw bytes, reinterpreted as `i32`.
pub fn content_hash(bytes: &[u8]) -> i32 {
    let mut h: u32 = 0x811C_9DC5;
    for &b in bytes {
        h ^= u32::from(b);
        h = h.wrapping_mul(0x0100_0193);
    }
    h as i32
}

/// Computes the key hash of a value, as the server would for the same bytes.
pub fn hash_code(value: &Value) -> i32 {
    match value {
        Value::I8(v) => i32::from(*v),
        Value::I16(v) => i32::from(*v),
        Value::I32(v) => *v,
        Value::I64(v) => fold_i64(*v),
        Value::F32(v) => v.to_bits() as i32,
        Value::F64(v) => fold_i64(v.to_bits() as i64),
        Value::Bool(v) => {
            if *v {
                1231
            } else {
                1237
            }
        }
        Value::String(v) => string_hash(v),
        Value::Uuid(v) => {
            let (msb, lsb) = v.as_u64_pair();
            fold_i64((msb ^ lsb) as i64)
        }
        Value::Bytes(v) => content_hash(v),
        Value::Complex(v) => binary_object_hash(&v.to_binary()),
        Value::Binary(v) => binary_object_hash(v),
    }
}

/// Computes the key hash honoring an explicit type code.
///
/// An explicit integer type code widens or narrows integer values before
/// hashing, so a key declared LONG hashes the same regardless of the variant
/// the caller happened to build. Non-integer codes fall back to the value's
/// own hash.
pub fn hash_with_type(value: &Value, code: Option<i8>) -> i32 {
    let Some(code) = code else {
        return hash_code(value);
    };
    let as_i64 = match value {
        Value::I8(v) => Some(i64::from(*v)),
        Value::I16(v) => Some(i64::from(*v)),
        Value::I32(v) => Some(i64::from(*v)),
        Value::I64(v) => Some(*v),
        _ => None,
    };
    match (code, as_i64) {
        (TYPE_BYTE, Some(v)) => i32::from(v as i8),
        (TYPE_SHORT, Some(v)) => i32::from(v as i16),
        (TYPE_INT, Some(v)) => v as i32,
        (TYPE_LONG, Some(v)) => fold_i64(v),
        _ => hash_code(value),
    }
}

fn fold_i64(v: i64) -> i32 {
    (v ^ (v >> 32)) as i32
}

fn binary_object_hash(obj: &BinaryObject) -> i32 {
    let mut w = BinaryWriter::new();
    write_object_body(&mut w, obj);
    content_hash(w.as_slice())
}

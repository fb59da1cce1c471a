//! Little-endian binary writer over a growable byte buffer.

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

/// Writes fixed-width primitives to a growable buffer in wire order.
///
/// All multi-byte integers are little-endian. Strings are written as an
/// `i32` byte length followed by UTF-8 bytes.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Creates a writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer and returns the written bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }

    /// Returns the written bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Writes a signed 8-bit integer.
    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    /// Writes an unsigned 8-bit integer.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Writes a signed 16-bit integer.
    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    /// Writes a signed 32-bit integer.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Writes a signed 64-bit integer.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Writes a 32-bit float.
    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    /// Writes a 64-bit float.
    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Writes a boolean as a single byte (1 or 0).
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Writes a UUID as its 16 big-endian bytes.
    pub fn write_uuid(&mut self, value: &Uuid) {
        self.buf.put_slice(value.as_bytes());
    }

    /// Writes a string as an `i32` byte length followed by UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) {
        self.buf.put_i32_le(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Writes raw bytes without a length prefix.
    pub fn write_raw(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    /// Writes a byte array as an `i32` length followed by its bytes.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.put_i32_le(value.len() as i32);
        self.buf.put_slice(value);
    }
}

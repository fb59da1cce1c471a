//! Little-endian binary reader over an immutable byte buffer.

use bytes::{Buf, Bytes};
use uuid::Uuid;

use crate::error::{GridError, Result};

/// Reads fixed-width primitives from a byte buffer in wire order.
///
/// The reader is the inverse of [`BinaryWriter`](super::BinaryWriter): all
/// multi-byte integers are little-endian, strings carry an `i32` byte length.
/// Reading past the end of the buffer fails with a serialization error
/// instead of panicking.
#[derive(Debug)]
pub struct BinaryReader {
    buf: Bytes,
}

impl BinaryReader {
    /// Creates a reader over the given buffer.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Consumes the reader and returns the unread remainder.
    pub fn into_remaining(self) -> Bytes {
        self.buf
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(GridError::Serialization(format!(
                "buffer underflow: need {} bytes for {}, {} remaining",
                n,
                what,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Reads a signed 8-bit integer.
    pub fn read_i8(&mut self) -> Result<i8> {
        self.need(1, "i8")?;
        Ok(self.buf.get_i8())
    }

    /// Reads an unsigned 8-bit integer.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    /// Reads a signed 16-bit integer.
    pub fn read_i16(&mut self) -> Result<i16> {
        self.need(2, "i16")?;
        Ok(self.buf.get_i16_le())
    }

    /// Reads a signed 32-bit integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32_le())
    }

    /// Reads a signed 64-bit integer.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.need(8, "i64")?;
        Ok(self.buf.get_i64_le())
    }

    /// Reads a 32-bit float.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.need(4, "f32")?;
        Ok(self.buf.get_f32_le())
    }

    /// Reads a 64-bit float.
    pub fn read_f64(&mut self) -> Result<f64> {
        self.need(8, "f64")?;
        Ok(self.buf.get_f64_le())
    }

    /// Reads a boolean byte.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a UUID from its 16 big-endian bytes.
    pub fn read_uuid(&mut self) -> Result<Uuid> {
        self.need(16, "uuid")?;
        let mut raw = [0u8; 16];
        self.buf.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes(raw))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(GridError::Serialization(format!(
                "negative string length {}",
                len
            )));
        }
        let len = len as usize;
        self.need(len, "string body")?;
        let raw = self.buf.copy_to_bytes(len);
        String::from_utf8(raw.to_vec())
            .map_err(|e| GridError::Serialization(format!("invalid UTF-8 in string: {}", e)))
    }

    /// Reads a length-prefixed byte array.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(GridError::Serialization(format!(
                "negative byte array length {}",
                len
            )));
        }
        let len = len as usize;
        self.need(len, "byte array body")?;
        Ok(self.buf.copy_to_bytes(len).to_vec())
    }

    /// Reads `n` raw bytes without a length prefix.
    pub fn read_raw(&mut self, n: usize) -> Result<Vec<u8>> {
        self.need(n, "raw bytes")?;
        Ok(self.buf.copy_to_bytes(n).to_vec())
    }
}

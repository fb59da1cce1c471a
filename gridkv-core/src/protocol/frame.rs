//! Length-delimited framing for the GridKV binary protocol.
//!
//! Every message on the wire is an `i32` little-endian byte length followed
//! by that many payload bytes. Requests carry `i16 opCode | i64 requestId |
//! body`; responses carry `i64 requestId | [i16 flags | topology version] |
//! i32 status | (errorMessage | body)`. This module handles the length
//! delimiting; header layout is interpreted by the session.

use bytes::{Buf, BufMut, BytesMut};

use super::constants::{REQUEST_HEADER_SIZE, SIZE_OF_LENGTH_FIELD};

/// Appends a complete request frame to `dst`.
pub fn write_request(dst: &mut BytesMut, op_code: i16, request_id: i64, payload: &[u8]) {
    let length = REQUEST_HEADER_SIZE + payload.len();
    dst.reserve(SIZE_OF_LENGTH_FIELD + length);
    dst.put_i32_le(length as i32);
    dst.put_i16_le(op_code);
    dst.put_i64_le(request_id);
    dst.put_slice(payload);
}

/// Appends a raw length-prefixed frame to `dst`.
pub fn write_frame(dst: &mut BytesMut, payload: &[u8]) {
    dst.reserve(SIZE_OF_LENGTH_FIELD + payload.len());
    dst.put_i32_le(payload.len() as i32);
    dst.put_slice(payload);
}

/// Extracts one complete frame payload from `src`.
///
/// Returns `None` when the buffer does not yet hold a complete frame; the
/// length prefix and payload are left in place for the next call.
pub fn read_frame(src: &mut BytesMut) -> Option<BytesMut> {
    if src.len() < SIZE_OF_LENGTH_FIELD {
        return None;
    }

    let length = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    if length < 0 {
        // a negative length means the stream is corrupt; surface everything
        // we have so the caller fails parsing it
        let garbage = src.split();
        return Some(garbage);
    }
    let length = length as usize;

    if src.len() < SIZE_OF_LENGTH_FIELD + length {
        return None;
    }

    src.advance(SIZE_OF_LENGTH_FIELD);
    Some(src.split_to(length))
}

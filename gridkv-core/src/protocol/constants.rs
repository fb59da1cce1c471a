//! Wire protocol constants for the GridKV binary client protocol.

/// Size of the frame length prefix in bytes.
pub const SIZE_OF_LENGTH_FIELD: usize = 4;

/// Size of the request header after the length prefix (op code + request id).
pub const REQUEST_HEADER_SIZE: usize = 2 + 8;

/// Operation code of the handshake message (sent before any framed request).
pub const HANDSHAKE_CODE: i8 = 1;

/// Client type code transmitted in the handshake: thin client.
pub const CLIENT_CODE_THIN: i8 = 2;

/// Handshake success flag value.
pub const HANDSHAKE_SUCCESS: i8 = 1;

/// Feature bit (in the handshake feature bitmask) requesting partition
/// awareness: one session per node and affinity-based request routing.
pub const FEATURE_PARTITION_AWARENESS: u8 = 1;

/// Response header flag: the affinity topology version changed. The new
/// version follows the flags field. Present only on partition-aware sessions.
pub const FLAG_TOPOLOGY_CHANGED: i16 = 1;

/// Response status indicating success.
pub const STATUS_SUCCESS: i32 = 0;

/// Server status code for rejected credentials.
pub const STATUS_AUTH_FAILED: i32 = 2000;

// Operation codes. Cache operations are pass-throughs from the cache layer;
// the router itself only originates `OP_CACHE_PARTITIONS`.

/// Read a single key.
pub const OP_CACHE_GET: i16 = 1000;
/// Store a single key/value pair.
pub const OP_CACHE_PUT: i16 = 1001;
/// Store a pair and return the previous value.
pub const OP_CACHE_GET_AND_PUT: i16 = 1006;
/// Replace the value of an existing key.
pub const OP_CACHE_REPLACE: i16 = 1009;
/// Check key presence.
pub const OP_CACHE_CONTAINS_KEY: i16 = 1011;
/// Clear a single key without invoking the removal pipeline.
pub const OP_CACHE_CLEAR_KEY: i16 = 1014;
/// Remove a single key.
pub const OP_CACHE_REMOVE_KEY: i16 = 1016;
/// Create a cache with the given name if it does not exist.
pub const OP_CACHE_GET_OR_CREATE_WITH_NAME: i16 = 1052;
/// Destroy a cache cluster-wide.
pub const OP_CACHE_DESTROY: i16 = 1056;
/// Request the per-cache partition distribution map.
pub const OP_CACHE_PARTITIONS: i16 = 1101;

// Type codes of the binary object model.

/// Signed 8-bit integer.
pub const TYPE_BYTE: i8 = 1;
/// Signed 16-bit integer.
pub const TYPE_SHORT: i8 = 2;
/// Signed 32-bit integer.
pub const TYPE_INT: i8 = 3;
/// Signed 64-bit integer.
pub const TYPE_LONG: i8 = 4;
/// 32-bit IEEE 754 float.
pub const TYPE_FLOAT: i8 = 5;
/// 64-bit IEEE 754 float.
pub const TYPE_DOUBLE: i8 = 6;
/// Boolean.
pub const TYPE_BOOL: i8 = 8;
/// UTF-8 string.
pub const TYPE_STRING: i8 = 9;
/// 16-byte UUID.
pub const TYPE_UUID: i8 = 10;
/// Raw byte array.
pub const TYPE_BYTE_ARRAY: i8 = 12;
/// Buffer-encoded opaque object carrying a type id and fields.
pub const TYPE_BINARY_OBJECT: i8 = 27;
/// Null marker (written in place of a type code).
pub const TYPE_NULL: i8 = 101;
/// Structured object with named fields, marshalled on write.
pub const TYPE_COMPLEX_OBJECT: i8 = 103;

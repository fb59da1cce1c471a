//! Wire protocol: constants, framing, handshake, and partition metadata.

pub mod constants;
pub mod frame;
pub mod handshake;
pub mod partitions;

pub use handshake::{HandshakeRequest, HandshakeResponse, ProtocolVersion};
pub use partitions::{AffinityTopologyVersion, CacheGroup, CachePartitionsResponse, GroupCacheEntry};

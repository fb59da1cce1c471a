//! Partition distribution messages.
//!
//! The response to [`OP_CACHE_PARTITIONS`](super::constants::OP_CACHE_PARTITIONS)
//! describes, per cache group, which node owns which partitions and how
//! composite keys map to their affinity key field. The server reports the
//! mapping in node-major form (`nodeId → [partitions]`); the client inverts
//! it to partition-major form before routing on it.
//!
//! Both directions are encoded here so integration tests can stand up mock
//! servers speaking the exact same bytes.

use uuid::Uuid;

use crate::binary::{BinaryReader, BinaryWriter};
use crate::error::{GridError, Result};

/// An affinity topology version: a `(major, minor)` pair ordered
/// lexicographically, monotonically non-decreasing over the cluster's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AffinityTopologyVersion {
    /// Major component, advanced on membership changes.
    pub major: i64,
    /// Minor component, advanced on assignment changes.
    pub minor: i32,
}

impl AffinityTopologyVersion {
    /// Creates a version pair.
    pub const fn new(major: i64, minor: i32) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for AffinityTopologyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One cache described inside a cache group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCacheEntry {
    /// The cache id (hash of the cache name).
    pub cache_id: i32,
    /// `keyTypeId → affinityKeyFieldId` pairs for composite keys.
    pub key_config: Vec<(i32, i32)>,
}

/// One cache group in a partitions response.
///
/// A group is `applicable` iff it uses the rendezvous affinity function; a
/// non-applicable group carries no partition map and its caches are routed
/// randomly forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGroup {
    /// Whether the rendezvous affinity function applies to this group.
    pub applicable: bool,
    /// The caches sharing this group's partition map.
    pub caches: Vec<GroupCacheEntry>,
    /// Node-major partition ownership: `(nodeId, [partitions])`.
    pub partition_map: Vec<(Uuid, Vec<i32>)>,
}

/// The complete payload of a partitions response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePartitionsResponse {
    /// The affinity topology version the mapping is valid for.
    pub version: AffinityTopologyVersion,
    /// The cache groups known to the server.
    pub groups: Vec<CacheGroup>,
}

impl CachePartitionsResponse {
    /// Writes the response payload (without frame or response header).
    pub fn write(&self, w: &mut BinaryWriter) {
        w.write_i64(self.version.major);
        w.write_i32(self.version.minor);
        w.write_i32(self.groups.len() as i32);
        for group in &self.groups {
            w.write_bool(group.applicable);
            w.write_i32(group.caches.len() as i32);
            for cache in &group.caches {
                w.write_i32(cache.cache_id);
                if group.applicable {
                    w.write_i32(cache.key_config.len() as i32);
                    for (key_type_id, field_id) in &cache.key_config {
                        w.write_i32(*key_type_id);
                        w.write_i32(*field_id);
                    }
                }
            }
            if group.applicable {
                w.write_i32(group.partition_map.len() as i32);
                for (node_id, partitions) in &group.partition_map {
                    w.write_uuid(node_id);
                    w.write_i32(partitions.len() as i32);
                    for partition in partitions {
                        w.write_i32(*partition);
                    }
                }
            }
        }
    }

    /// Reads a response payload written by [`CachePartitionsResponse::write`].
    pub fn read(r: &mut BinaryReader) -> Result<Self> {
        let version = AffinityTopologyVersion::new(r.read_i64()?, r.read_i32()?);
        let group_count = non_negative(r.read_i32()?, "group count")?;

        let mut groups = Vec::with_capacity(group_count);
        for _ in 0..group_count {
            let applicable = r.read_bool()?;
            let cache_count = non_negative(r.read_i32()?, "cache count")?;

            let mut caches = Vec::with_capacity(cache_count);
            for _ in 0..cache_count {
                let cache_id = r.read_i32()?;
                let mut key_config = Vec::new();
                if applicable {
                    let cfg_count = non_negative(r.read_i32()?, "key config count")?;
                    for _ in 0..cfg_count {
                        key_config.push((r.read_i32()?, r.read_i32()?));
                    }
                }
                caches.push(GroupCacheEntry { cache_id, key_config });
            }

            let mut partition_map = Vec::new();
            if applicable {
                let node_count = non_negative(r.read_i32()?, "node count")?;
                for _ in 0..node_count {
                    let node_id = r.read_uuid()?;
                    let part_count = non_negative(r.read_i32()?, "partition count")?;
                    let mut partitions = Vec::with_capacity(part_count);
                    for _ in 0..part_count {
                        partitions.push(r.read_i32()?);
                    }
                    partition_map.push((node_id, partitions));
                }
            }

            groups.push(CacheGroup {
                applicable,
                caches,
                partition_map,
            });
        }

        Ok(Self { version, groups })
    }
}

fn non_negative(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| GridError::Serialization(format!("negative {}: {}", what, value)))
}

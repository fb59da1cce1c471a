//! Affinity routing: the distribution map, rendezvous partitioning, and
//! affinity-key resolution.
//!
//! The cluster assigns each partition to a primary node and reports the
//! assignment per cache group. This module caches those assignments, keeps
//! them consistent with the affinity topology version, and computes which
//! node should receive a request for a given key. Everything here is
//! synchronous; the registry is safe to consult from any task.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use gridkv_core::binary::hash::hash_with_type;
use gridkv_core::protocol::constants::{TYPE_BINARY_OBJECT, TYPE_COMPLEX_OBJECT};
use gridkv_core::protocol::partitions::{CacheGroup, CachePartitionsResponse};
use gridkv_core::{AffinityTopologyVersion, Value};

/// What a cache operation supplies to `send` to enable affinity routing.
#[derive(Debug, Clone)]
pub struct AffinityHint {
    /// The target cache id.
    pub cache_id: i32,
    /// The operation's key.
    pub key: Value,
    /// Explicit key type code, when the caller declared one.
    pub key_type: Option<i8>,
}

impl AffinityHint {
    /// Creates a hint for a key with no explicit type code.
    pub fn new(cache_id: i32, key: Value) -> Self {
        Self {
            cache_id,
            key,
            key_type: None,
        }
    }

    /// Creates a hint with an explicit key type code.
    pub fn with_type(cache_id: i32, key: Value, key_type: i8) -> Self {
        Self {
            cache_id,
            key,
            key_type: Some(key_type),
        }
    }
}

/// The stored affinity data for one cache.
#[derive(Debug, Clone, Default)]
pub struct CacheAffinityMap {
    /// `partition → nodeId`, inverted from the wire's node-major form.
    partition_mapping: HashMap<i32, Uuid>,
    /// `keyTypeId → affinityKeyFieldId` for composite keys.
    key_config: HashMap<i32, i32>,
}

impl CacheAffinityMap {
    /// Builds the map for one cache of a group, inverting the node-major
    /// partition map. Non-applicable groups produce an empty mapping, which
    /// routes the cache randomly forever.
    pub fn from_group(group: &CacheGroup, key_config: &[(i32, i32)]) -> Self {
        let mut partition_mapping = HashMap::new();
        if group.applicable {
            for (node_id, partitions) in &group.partition_map {
                for partition in partitions {
                    partition_mapping.insert(*partition, *node_id);
                }
            }
        }
        Self {
            partition_mapping,
            key_config: key_config.iter().copied().collect(),
        }
    }

    /// Returns the number of partitions known for this cache.
    pub fn partition_count(&self) -> usize {
        self.partition_mapping.len()
    }

    /// Returns the owner of a partition, if the mapping knows one.
    pub fn node_for_partition(&self, partition: i32) -> Option<Uuid> {
        self.partition_mapping.get(&partition).copied()
    }

    /// Returns the primary node for a key, or `None` when the mapping is
    /// empty or the partition has no recorded owner.
    pub fn node_for_key(&self, key: &Value, key_type: Option<i8>) -> Option<Uuid> {
        if self.partition_mapping.is_empty() {
            return None;
        }
        let hash = affinity_key_hash(key, key_type, &self.key_config);
        let partition = key_partition(hash, self.partition_mapping.len());
        self.node_for_partition(partition)
    }
}

/// Maps a key hash onto a partition index in `[0, partition_count)`.
///
/// For a power-of-two count the upper half of the hash is folded in before
/// masking; the shift is arithmetic on a 32-bit value. Otherwise the
/// remainder's absolute value is used, with any negative result clamped to 0
/// to match the server's wrapping arithmetic.
pub fn key_partition(key_hash: i32, partition_count: usize) -> i32 {
    let n = partition_count as i32;
    if n <= 0 {
        return 0;
    }
    if n & (n - 1) == 0 {
        (key_hash ^ (key_hash >> 16)) & (n - 1)
    } else {
        let p = (key_hash % n).wrapping_abs();
        if p < 0 {
            0
        } else {
            p
        }
    }
}

/// Computes the affinity key hash for a key.
///
/// Composite keys (complex or binary objects) consult the cache's key
/// configuration: when an affinity field is configured for the key's type id
/// and present on the object, the field value is hashed instead of the whole
/// object.
pub fn affinity_key_hash(key: &Value, key_type: Option<i8>, key_config: &HashMap<i32, i32>) -> i32 {
    let code = key_type.unwrap_or_else(|| key.type_code());

    if code == TYPE_COMPLEX_OBJECT || code == TYPE_BINARY_OBJECT {
        let binary = match key {
            Value::Complex(obj) => Some(obj.to_binary()),
            Value::Binary(obj) => Some(obj.clone()),
            _ => None,
        };
        if let Some(binary) = binary {
            if let Some(field_id) = key_config.get(&binary.type_id()) {
                if let Some(field) = binary.field_by_id(*field_id) {
                    return hash_with_type(field, None);
                }
            }
            return hash_with_type(&Value::Binary(binary), None);
        }
    }

    hash_with_type(key, Some(code))
}

/// A routing decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The cache is not in the distribution map; a refresh should be fired
    /// and the request routed to an arbitrary node meanwhile.
    Unknown,
    /// The cache is known but cannot be affinity-routed (empty mapping, or
    /// the partition's owner is not recorded).
    Random,
    /// The key's primary node.
    Node(Uuid),
}

#[derive(Debug, Default)]
struct RegistryInner {
    version: Option<AffinityTopologyVersion>,
    caches: HashMap<i32, CacheAffinityMap>,
}

/// The versioned client-side cache of per-cache partition assignments.
///
/// The stored topology version never decreases. A newer version (from a
/// refresh response or a topology-changed notification) clears every cached
/// mapping; stale data is never merged.
#[derive(Debug, Default)]
pub struct AffinityRegistry {
    inner: Mutex<RegistryInner>,
}

impl AffinityRegistry {
    /// Creates an empty registry with no version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current topology version, if one has been observed.
    pub fn version(&self) -> Option<AffinityTopologyVersion> {
        self.inner.lock().expect("affinity registry poisoned").version
    }

    /// Returns `true` if the distribution map has an entry for the cache.
    pub fn contains_cache(&self, cache_id: i32) -> bool {
        self.inner
            .lock()
            .expect("affinity registry poisoned")
            .caches
            .contains_key(&cache_id)
    }

    /// Routes a hinted request.
    pub fn route(&self, hint: &AffinityHint) -> Route {
        let inner = self.inner.lock().expect("affinity registry poisoned");
        match inner.caches.get(&hint.cache_id) {
            None => Route::Unknown,
            Some(map) => match map.node_for_key(&hint.key, hint.key_type) {
                Some(node) => Route::Node(node),
                None => Route::Random,
            },
        }
    }

    /// Observes a topology-changed notification.
    ///
    /// A strictly newer version advances the stored version and clears the
    /// distribution map; returns `true` in that case. Stale or equal
    /// notifications are ignored.
    pub fn observe_version(&self, version: AffinityTopologyVersion) -> bool {
        let mut inner = self.inner.lock().expect("affinity registry poisoned");
        if inner.version.is_some_and(|current| version <= current) {
            return false;
        }
        inner.version = Some(version);
        inner.caches.clear();
        true
    }

    /// Merges a partitions-response into the distribution map.
    ///
    /// A newer response version clears the map and adopts the version; an
    /// older one is discarded whole; an equal one merges entries for caches
    /// not already present.
    pub fn apply_refresh(&self, response: &CachePartitionsResponse) {
        let mut inner = self.inner.lock().expect("affinity registry poisoned");

        match inner.version {
            Some(current) if response.version < current => {
                tracing::debug!(
                    response_version = %response.version,
                    current_version = %current,
                    "discarding stale partitions response"
                );
                return;
            }
            Some(current) if response.version > current => {
                inner.caches.clear();
                inner.version = Some(response.version);
            }
            None => inner.version = Some(response.version),
            _ => {}
        }

        for group in &response.groups {
            for cache in &group.caches {
                if !inner.caches.contains_key(&cache.cache_id) {
                    inner.caches.insert(
                        cache.cache_id,
                        CacheAffinityMap::from_group(group, &cache.key_config),
                    );
                }
            }
        }

        tracing::debug!(
            version = %response.version,
            caches = inner.caches.len(),
            "distribution map updated"
        );
    }

    /// Drops every cached mapping but keeps the version.
    pub fn clear_caches(&self) {
        self.inner
            .lock()
            .expect("affinity registry poisoned")
            .caches
            .clear();
    }
}

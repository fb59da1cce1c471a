//! In-process mock cluster speaking the GridKV binary protocol.
//!
//! Every node accepts handshakes, serves the keyed cache operations against
//! a cluster-shared store, answers partition-map requests with a simple
//! modulo assignment over the currently alive nodes, and piggybacks a
//! topology-changed flag on the first response after a membership change.
//! Nodes can be killed and restarted on the same port to exercise failover.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use uuid::Uuid;

use gridkv_client::affinity::key_partition;
use gridkv_core::binary::hash::{field_id, hash_code, string_hash, type_id};
use gridkv_core::binary::value::{read_object, write_object, write_object_nullable};
use gridkv_core::protocol::constants::*;
use gridkv_core::protocol::frame;
use gridkv_core::protocol::handshake::{HandshakeRequest, HandshakeResponse};
use gridkv_core::protocol::partitions::{
    AffinityTopologyVersion, CacheGroup, CachePartitionsResponse, GroupCacheEntry,
};
use gridkv_core::{BinaryReader, BinaryWriter, Value};

/// Partitions per cache in the mock assignment.
pub const PARTITION_COUNT: i32 = 8;

/// One served cache operation, for routing assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpRecord {
    pub node: Uuid,
    pub op: i16,
    pub cache_id: i32,
}

struct ClusterState {
    version: Mutex<AffinityTopologyVersion>,
    alive: Mutex<Vec<Uuid>>,
    caches: Mutex<HashMap<i32, Vec<(i32, i32)>>>,
    store: Mutex<HashMap<(i32, Vec<u8>), Value>>,
    ops: Mutex<Vec<OpRecord>>,
}

impl ClusterState {
    fn bump_version(&self) {
        self.version.lock().unwrap().major += 1;
    }

    fn primary_for_partition(&self, partition: i32) -> Option<Uuid> {
        let alive = self.alive.lock().unwrap();
        if alive.is_empty() {
            None
        } else {
            Some(alive[partition as usize % alive.len()])
        }
    }

    fn partitions_response(&self, requested: &[i32]) -> CachePartitionsResponse {
        let alive = self.alive.lock().unwrap().clone();
        let caches = self.caches.lock().unwrap();
        let version = *self.version.lock().unwrap();

        let mut groups = Vec::new();
        for cache_id in requested {
            let Some(key_config) = caches.get(cache_id) else {
                continue;
            };
            let mut per_node: HashMap<Uuid, Vec<i32>> = HashMap::new();
            if !alive.is_empty() {
                for partition in 0..PARTITION_COUNT {
                    let owner = alive[partition as usize % alive.len()];
                    per_node.entry(owner).or_default().push(partition);
                }
            }
            groups.push(CacheGroup {
                applicable: true,
                caches: vec![GroupCacheEntry {
                    cache_id: *cache_id,
                    key_config: key_config.clone(),
                }],
                partition_map: per_node.into_iter().collect(),
            });
        }

        CachePartitionsResponse { version, groups }
    }
}

struct MockNodeHandle {
    node_id: Uuid,
    addr: SocketAddr,
    shutdown: Option<watch::Sender<bool>>,
}

/// A cluster of mock nodes sharing one store and partition plan.
pub struct MockCluster {
    state: Arc<ClusterState>,
    nodes: Vec<MockNodeHandle>,
}

impl MockCluster {
    /// Starts `n` nodes on ephemeral ports.
    pub async fn start(n: usize) -> Self {
        let state = Arc::new(ClusterState {
            version: Mutex::new(AffinityTopologyVersion::new(1, 0)),
            alive: Mutex::new(Vec::new()),
            caches: Mutex::new(HashMap::new()),
            store: Mutex::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
        });

        let mut cluster = Self {
            state,
            nodes: Vec::new(),
        };
        for _ in 0..n {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let node_id = Uuid::new_v4();
            let shutdown = spawn_node(listener, node_id, Arc::clone(&cluster.state));
            cluster.state.alive.lock().unwrap().push(node_id);
            cluster.nodes.push(MockNodeHandle {
                node_id,
                addr,
                shutdown: Some(shutdown),
            });
        }
        cluster
    }

    /// Returns all node endpoints, including dead ones.
    pub fn endpoints(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.addr.to_string()).collect()
    }

    /// Returns node ids in creation order.
    pub fn node_ids(&self) -> Vec<Uuid> {
        self.nodes.iter().map(|n| n.node_id).collect()
    }

    /// Registers a cache without a key configuration.
    pub fn create_cache(&self, name: &str) {
        self.state
            .caches
            .lock()
            .unwrap()
            .entry(string_hash(name))
            .or_default();
    }

    /// Registers a cache whose keys of `type_name` use `field_name` as the
    /// affinity key field.
    pub fn create_cache_with_key_config(&self, name: &str, type_name: &str, field_name: &str) {
        self.state
            .caches
            .lock()
            .unwrap()
            .insert(string_hash(name), vec![(type_id(type_name), field_id(field_name))]);
    }

    /// Kills a node: its listener and every open connection drop.
    pub fn kill(&mut self, index: usize) {
        let node = &mut self.nodes[index];
        if let Some(shutdown) = node.shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.state
            .alive
            .lock()
            .unwrap()
            .retain(|id| *id != node.node_id);
        self.state.bump_version();
    }

    /// Restarts a killed node on its original port with its original id.
    pub async fn restart(&mut self, index: usize) {
        let (addr, node_id) = {
            let node = &self.nodes[index];
            assert!(node.shutdown.is_none(), "node {} is not dead", index);
            (node.addr, node.node_id)
        };

        let listener = TcpListener::bind(addr).await.unwrap();
        let shutdown = spawn_node(listener, node_id, Arc::clone(&self.state));
        self.nodes[index].shutdown = Some(shutdown);
        self.state.alive.lock().unwrap().push(node_id);
        self.state.bump_version();
    }

    /// Snapshot of the served cache operations.
    pub fn ops(&self) -> Vec<OpRecord> {
        self.state.ops.lock().unwrap().clone()
    }

    /// Clears the operation log.
    pub fn clear_ops(&self) {
        self.state.ops.lock().unwrap().clear();
    }

    /// Returns the distinct nodes that served operations since the last
    /// [`MockCluster::clear_ops`].
    pub fn nodes_seen(&self) -> Vec<Uuid> {
        let mut seen = Vec::new();
        for record in self.ops() {
            if !seen.contains(&record.node) {
                seen.push(record.node);
            }
        }
        seen
    }

    /// The node currently owning the key's partition, per the mock plan.
    pub fn primary_for_key(&self, key: &Value) -> Option<Uuid> {
        self.primary_for_hash(hash_code(key))
    }

    /// The node currently owning the partition of a precomputed key hash.
    pub fn primary_for_hash(&self, hash: i32) -> Option<Uuid> {
        let partition = key_partition(hash, PARTITION_COUNT as usize);
        self.state.primary_for_partition(partition)
    }

    /// Current cluster topology version.
    pub fn version(&self) -> AffinityTopologyVersion {
        *self.state.version.lock().unwrap()
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        for node in &self.nodes {
            if let Some(shutdown) = &node.shutdown {
                let _ = shutdown.send(true);
            }
        }
    }
}

fn spawn_node(
    listener: TcpListener,
    node_id: Uuid,
    state: Arc<ClusterState>,
) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut shutdown = shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                accepted = listener.accept() => {
                    let Ok((socket, _)) = accepted else { return };
                    tokio::spawn(serve_connection(
                        socket,
                        node_id,
                        Arc::clone(&state),
                        shutdown_rx.clone(),
                    ));
                }
            }
        }
    });

    shutdown_tx
}

async fn serve_connection(
    mut socket: TcpStream,
    node_id: Uuid,
    state: Arc<ClusterState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = BytesMut::with_capacity(4096);

    let request = loop {
        if let Some(payload) = frame::read_frame(&mut buf) {
            break HandshakeRequest::decode(payload.freeze()).unwrap();
        }
        tokio::select! {
            _ = shutdown.changed() => return,
            n = socket.read_buf(&mut buf) => {
                if n.unwrap_or(0) == 0 {
                    return;
                }
            }
        }
    };

    let partition_aware = request.features & FEATURE_PARTITION_AWARENESS != 0;
    let response = HandshakeResponse::Accepted {
        features: FEATURE_PARTITION_AWARENESS,
        node_id: Some(node_id),
    };
    if socket.write_all(&response.encode(request.version)).await.is_err() {
        return;
    }

    let mut last_seen_version = *state.version.lock().unwrap();

    loop {
        let payload = loop {
            if let Some(payload) = frame::read_frame(&mut buf) {
                break payload.freeze();
            }
            tokio::select! {
                _ = shutdown.changed() => return,
                n = socket.read_buf(&mut buf) => {
                    match n {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                }
            }
        };

        let mut r = BinaryReader::new(payload);
        let op = r.read_i16().unwrap();
        let request_id = r.read_i64().unwrap();
        let (status, body) = handle_op(&state, node_id, op, &mut r);

        let mut w = BinaryWriter::new();
        w.write_i64(request_id);
        if partition_aware {
            let current = *state.version.lock().unwrap();
            if current > last_seen_version {
                w.write_i16(FLAG_TOPOLOGY_CHANGED);
                w.write_i64(current.major);
                w.write_i32(current.minor);
                last_seen_version = current;
            } else {
                w.write_i16(0);
            }
        }
        w.write_i32(status);
        w.write_raw(body.as_slice());

        let mut framed = BytesMut::new();
        frame::write_frame(&mut framed, w.as_slice());
        if socket.write_all(&framed).await.is_err() {
            return;
        }
    }
}

fn encode_value(value: &Value) -> Vec<u8> {
    let mut w = BinaryWriter::new();
    write_object(&mut w, value);
    w.into_bytes().to_vec()
}

fn handle_op(
    state: &ClusterState,
    node_id: Uuid,
    op: i16,
    r: &mut BinaryReader,
) -> (i32, BinaryWriter) {
    let mut body = BinaryWriter::new();

    match op {
        OP_CACHE_GET_OR_CREATE_WITH_NAME => {
            let name = r.read_string().unwrap();
            state
                .caches
                .lock()
                .unwrap()
                .entry(string_hash(&name))
                .or_default();
            (STATUS_SUCCESS, body)
        }
        OP_CACHE_DESTROY => {
            let cache_id = r.read_i32().unwrap();
            state.caches.lock().unwrap().remove(&cache_id);
            (STATUS_SUCCESS, body)
        }
        OP_CACHE_PARTITIONS => {
            let count = r.read_i32().unwrap();
            let mut requested = Vec::with_capacity(count as usize);
            for _ in 0..count {
                requested.push(r.read_i32().unwrap());
            }
            state.partitions_response(&requested).write(&mut body);
            (STATUS_SUCCESS, body)
        }
        _ => {
            let cache_id = r.read_i32().unwrap();
            let _flags = r.read_u8().unwrap();

            state.ops.lock().unwrap().push(OpRecord {
                node: node_id,
                op,
                cache_id,
            });

            if !state.caches.lock().unwrap().contains_key(&cache_id) {
                body.write_string(&format!("Cache does not exist [cacheId={}]", cache_id));
                return (1000, body);
            }

            let key = read_object(r).unwrap();
            let map_key = (cache_id, encode_value(&key));
            let mut store = state.store.lock().unwrap();

            match op {
                OP_CACHE_PUT => {
                    let value = read_object(r).unwrap();
                    store.insert(map_key, value);
                }
                OP_CACHE_GET => {
                    write_object_nullable(&mut body, store.get(&map_key));
                }
                OP_CACHE_GET_AND_PUT => {
                    let value = read_object(r).unwrap();
                    let previous = store.insert(map_key, value);
                    write_object_nullable(&mut body, previous.as_ref());
                }
                OP_CACHE_REPLACE => {
                    let value = read_object(r).unwrap();
                    let present = store.contains_key(&map_key);
                    if present {
                        store.insert(map_key, value);
                    }
                    body.write_bool(present);
                }
                OP_CACHE_CONTAINS_KEY => {
                    body.write_bool(store.contains_key(&map_key));
                }
                OP_CACHE_REMOVE_KEY => {
                    body.write_bool(store.remove(&map_key).is_some());
                }
                OP_CACHE_CLEAR_KEY => {
                    store.remove(&map_key);
                }
                other => {
                    body.write_string(&format!("Unsupported operation {}", other));
                    return (1, body);
                }
            }
            (STATUS_SUCCESS, body)
        }
    }
}

//! The client entry point and the thin per-cache operation facade.
//!
//! Cache operations are one `send` each: they write the request body, hand
//! the router an affinity hint built from the key, and decode the response
//! body. Everything about *where* the request goes lives in the router.

use gridkv_core::binary::hash::string_hash;
use gridkv_core::binary::value::{read_object_nullable, write_object};
use gridkv_core::error::{GridError, Result};
use gridkv_core::protocol::constants::{
    OP_CACHE_CLEAR_KEY, OP_CACHE_CONTAINS_KEY, OP_CACHE_DESTROY, OP_CACHE_GET,
    OP_CACHE_GET_AND_PUT, OP_CACHE_GET_OR_CREATE_WITH_NAME, OP_CACHE_PUT, OP_CACHE_REMOVE_KEY,
    OP_CACHE_REPLACE,
};
use gridkv_core::Value;
use tokio::sync::broadcast;

use crate::affinity::AffinityHint;
use crate::config::ClientConfig;
use crate::router::{Router, RouterState, StateChange};

/// A GridKV client: owns the router and hands out cache handles.
#[derive(Debug, Clone)]
pub struct GridClient {
    router: Router,
}

impl GridClient {
    /// Creates a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            router: Router::new(config),
        }
    }

    /// Creates a client and connects it to the cluster.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config);
        client.router.connect().await?;
        Ok(client)
    }

    /// Returns the router, the low-level dispatch surface.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the current connection state.
    pub fn state(&self) -> RouterState {
        self.router.state()
    }

    /// Subscribes to connection state transitions.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.router.subscribe_state()
    }

    /// Disconnects from the cluster.
    pub async fn disconnect(&self) {
        self.router.disconnect().await;
    }

    /// Returns a handle to an existing cache.
    ///
    /// No request is sent; operations on a cache that does not exist fail
    /// with the server's `Operation` error.
    pub fn cache(&self, name: &str) -> Result<CacheHandle> {
        CacheHandle::new(self.router.clone(), name)
    }

    /// Creates the cache if it does not exist and returns a handle to it.
    pub async fn get_or_create_cache(&self, name: &str) -> Result<CacheHandle> {
        let handle = self.cache(name)?;
        let cache_name = name.to_string();
        self.router
            .send(
                OP_CACHE_GET_OR_CREATE_WITH_NAME,
                |w| {
                    w.write_string(&cache_name);
                    Ok(())
                },
                |_| Ok(()),
                None,
            )
            .await?;
        Ok(handle)
    }

    /// Destroys a cache cluster-wide.
    pub async fn destroy_cache(&self, name: &str) -> Result<()> {
        let cache_id = cache_id_of(name)?;
        self.router
            .send(
                OP_CACHE_DESTROY,
                |w| {
                    w.write_i32(cache_id);
                    Ok(())
                },
                |_| Ok(()),
                None,
            )
            .await
    }
}

fn cache_id_of(name: &str) -> Result<i32> {
    if name.is_empty() {
        return Err(GridError::IllegalArgument(
            "cache name must not be empty".to_string(),
        ));
    }
    Ok(string_hash(name))
}

/// A handle to one cache.
///
/// Cheap to clone. An explicit key type code can be attached so keys hash
/// the way the server expects when the declared type is wider than the
/// values supplied.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    router: Router,
    name: String,
    cache_id: i32,
    key_type: Option<i8>,
}

impl CacheHandle {
    fn new(router: Router, name: &str) -> Result<Self> {
        let cache_id = cache_id_of(name)?;
        Ok(Self {
            router,
            name: name.to_string(),
            cache_id,
            key_type: None,
        })
    }

    /// Returns the cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cache id derived from the name.
    pub fn cache_id(&self) -> i32 {
        self.cache_id
    }

    /// Declares the key type for affinity hashing.
    pub fn with_key_type(mut self, type_code: i8) -> Self {
        self.key_type = Some(type_code);
        self
    }

    fn hint(&self, key: &Value) -> AffinityHint {
        AffinityHint {
            cache_id: self.cache_id,
            key: key.clone(),
            key_type: self.key_type,
        }
    }

    /// Stores a key/value pair.
    pub async fn put(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        let hint = self.hint(&key);
        self.router
            .send(
                OP_CACHE_PUT,
                |w| {
                    w.write_i32(self.cache_id);
                    w.write_u8(0);
                    write_object(w, &key);
                    write_object(w, &value);
                    Ok(())
                },
                |_| Ok(()),
                Some(&hint),
            )
            .await
    }

    /// Reads a key, returning `None` when absent.
    pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        let hint = self.hint(&key);
        self.router
            .send(
                OP_CACHE_GET,
                |w| {
                    w.write_i32(self.cache_id);
                    w.write_u8(0);
                    write_object(w, &key);
                    Ok(())
                },
                read_object_nullable,
                Some(&hint),
            )
            .await
    }

    /// Stores a pair and returns the previous value, if any.
    pub async fn get_and_put(
        &self,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let key = key.into();
        let value = value.into();
        let hint = self.hint(&key);
        self.router
            .send(
                OP_CACHE_GET_AND_PUT,
                |w| {
                    w.write_i32(self.cache_id);
                    w.write_u8(0);
                    write_object(w, &key);
                    write_object(w, &value);
                    Ok(())
                },
                read_object_nullable,
                Some(&hint),
            )
            .await
    }

    /// Replaces the value of an existing key. Returns `true` if the key was
    /// present and replaced.
    pub async fn replace(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<bool> {
        let key = key.into();
        let value = value.into();
        let hint = self.hint(&key);
        self.router
            .send(
                OP_CACHE_REPLACE,
                |w| {
                    w.write_i32(self.cache_id);
                    w.write_u8(0);
                    write_object(w, &key);
                    write_object(w, &value);
                    Ok(())
                },
                |r| r.read_bool(),
                Some(&hint),
            )
            .await
    }

    /// Returns `true` if the key is present.
    pub async fn contains_key(&self, key: impl Into<Value>) -> Result<bool> {
        let key = key.into();
        let hint = self.hint(&key);
        self.router
            .send(
                OP_CACHE_CONTAINS_KEY,
                |w| {
                    w.write_i32(self.cache_id);
                    w.write_u8(0);
                    write_object(w, &key);
                    Ok(())
                },
                |r| r.read_bool(),
                Some(&hint),
            )
            .await
    }

    /// Removes a key. Returns `true` if the key was present.
    pub async fn remove_key(&self, key: impl Into<Value>) -> Result<bool> {
        let key = key.into();
        let hint = self.hint(&key);
        self.router
            .send(
                OP_CACHE_REMOVE_KEY,
                |w| {
                    w.write_i32(self.cache_id);
                    w.write_u8(0);
                    write_object(w, &key);
                    Ok(())
                },
                |r| r.read_bool(),
                Some(&hint),
            )
            .await
    }

    /// Clears a key without invoking the removal pipeline.
    pub async fn clear_key(&self, key: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let hint = self.hint(&key);
        self.router
            .send(
                OP_CACHE_CLEAR_KEY,
                |w| {
                    w.write_i32(self.cache_id);
                    w.write_u8(0);
                    write_object(w, &key);
                    Ok(())
                },
                |_| Ok(()),
                Some(&hint),
            )
            .await
    }
}

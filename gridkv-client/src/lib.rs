//! Async partition-aware thin client for GridKV clusters.
//!
//! The client keeps one TCP session per reachable cluster node, learns the
//! cluster's partition assignments, and routes each cache operation to the
//! node owning the primary copy of its key, failing over to another node
//! on connection loss. When routing information is missing (unknown cache,
//! stale distribution map, partition awareness off), requests still succeed
//! against an arbitrary live node.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use gridkv_client::{ClientConfig, GridClient};
//!
//! #[tokio::main]
//! async fn main() -> gridkv_client::Result<()> {
//!     let config = ClientConfig::builder()
//!         .add_endpoint("127.0.0.1:10800")
//!         .add_endpoint("127.0.0.1:10801")
//!         .partition_awareness(true)
//!         .build()?;
//!     let client = GridClient::connect(config).await?;
//!
//!     let cache = client.get_or_create_cache("my-cache").await?;
//!     cache.put(42i32, "value").await?;
//!     let value = cache.get(42i32).await?;
//!     println!("{:?}", value);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Partition awareness
//!
//! With `partition_awareness(true)` and at least two live sessions, the
//! client resolves each key to its partition with the cluster's rendezvous
//! function and sends the request straight to the primary node. The
//! distribution map is fetched lazily per cache and invalidated whenever a
//! response signals a new affinity topology version.
//!
//! # Feature flags
//!
//! | Flag  | Purpose |
//! |-------|---------|
//! | `tls` | TLS connections via `rustls` |

#![warn(missing_docs)]

pub mod affinity;
pub mod cache;
pub mod config;
pub mod pool;
pub mod router;
pub mod session;

pub use affinity::AffinityHint;
pub use cache::{CacheHandle, GridClient};
pub use config::{BackoffConfig, ClientConfig, ClientConfigBuilder, TlsConfig};
pub use router::{Router, RouterState, StateChange};
pub use session::{NodeSession, SessionId, SessionObserver};

pub use gridkv_core::{
    AffinityTopologyVersion, BinaryObject, ComplexObject, GridError, Result, Value,
};

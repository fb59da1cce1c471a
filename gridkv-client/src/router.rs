//! Request routing, failover, and the connection state machine.
//!
//! The router is the dispatch surface the cache layer talks to: it picks a
//! session for each request (affinity-chosen when partition awareness is
//! active and the operation carries a hint, otherwise the first live
//! session), retries lost-connection failures on surviving sessions, and
//! drives the background connector toward one session per reachable node.
//!
//! State transitions (`Disconnected → Connecting → Connected`) are broadcast
//! to subscribers. Losing every session moves the router back through
//! `Connecting` via a reconnect sweep; if the sweep fails the router ends up
//! `Disconnected` and requests fail with `IllegalState` until the caller
//! connects again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use gridkv_core::error::{GridError, Result};
use gridkv_core::protocol::constants::OP_CACHE_PARTITIONS;
use gridkv_core::protocol::partitions::CachePartitionsResponse;
use gridkv_core::{AffinityTopologyVersion, BinaryReader, BinaryWriter};

use crate::affinity::{AffinityHint, AffinityRegistry, Route};
use crate::config::ClientConfig;
use crate::pool::ConnectionPool;
use crate::session::{NodeSession, SessionId, SessionObserver};

/// Connection state of the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// No sessions; `connect` must be called.
    Disconnected,
    /// An endpoint sweep is in progress.
    Connecting,
    /// At least one session is live and requests are accepted.
    Connected,
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// A state transition, delivered to [`Router::subscribe_state`] receivers.
#[derive(Debug, Clone)]
pub struct StateChange {
    /// The state entered.
    pub state: RouterState,
    /// Why the transition happened, when there is a cause worth reporting.
    pub reason: Option<String>,
}

struct RouterShared {
    config: ClientConfig,
    state: Mutex<RouterState>,
    state_tx: broadcast::Sender<StateChange>,
    pool: ConnectionPool,
    affinity: AffinityRegistry,
    connector_running: AtomicBool,
    connector_handle: Mutex<Option<JoinHandle<()>>>,
    refresh_running: AtomicBool,
    reconnect_running: AtomicBool,
}

impl RouterShared {
    fn state(&self) -> RouterState {
        *self.state.lock().expect("router state poisoned")
    }

    /// Unconditionally enters `new`, returning the previous state.
    fn set_state(&self, new: RouterState, reason: Option<String>) -> RouterState {
        let prev = {
            let mut state = self.state.lock().expect("router state poisoned");
            std::mem::replace(&mut *state, new)
        };
        if prev != new {
            tracing::info!(from = %prev, to = %new, reason = ?reason, "router state changed");
            let _ = self.state_tx.send(StateChange { state: new, reason });
        }
        prev
    }

    /// Enters `to` only when currently in `from`; otherwise reports the
    /// actual state.
    fn transition_from(
        &self,
        from: RouterState,
        to: RouterState,
        reason: Option<String>,
    ) -> std::result::Result<(), RouterState> {
        {
            let mut state = self.state.lock().expect("router state poisoned");
            if *state != from {
                return Err(*state);
            }
            *state = to;
        }
        tracing::info!(from = %from, to = %to, reason = ?reason, "router state changed");
        let _ = self.state_tx.send(StateChange { state: to, reason });
        Ok(())
    }
}

/// Observer wired into every session; holds the router weakly so sessions do
/// not keep a dropped client alive.
struct RouterObserver {
    shared: Weak<RouterShared>,
}

impl SessionObserver for RouterObserver {
    fn on_topology_changed(&self, version: AffinityTopologyVersion) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.affinity.observe_version(version) {
            tracing::debug!(version = %version, "affinity topology changed, distribution map cleared");
            // new nodes may have joined; try to reach them
            trigger_background_connect(&shared);
        }
    }

    fn on_session_closed(&self, id: SessionId) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.pool.remove_session(id).is_some() {
            handle_session_lost(&shared);
        }
    }
}

fn observer_for(shared: &Arc<RouterShared>) -> Arc<dyn SessionObserver> {
    Arc::new(RouterObserver {
        shared: Arc::downgrade(shared),
    })
}

/// The dispatch surface of the client. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Router {
    shared: Arc<RouterShared>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.shared.state())
            .field("sessions", &self.shared.pool.session_count())
            .finish()
    }
}

impl Router {
    /// Creates a disconnected router over the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        let (state_tx, _) = broadcast::channel(16);
        let pool = ConnectionPool::new(config.endpoints().to_vec(), config.partition_awareness());
        Self {
            shared: Arc::new(RouterShared {
                config,
                state: Mutex::new(RouterState::Disconnected),
                state_tx,
                pool,
                affinity: AffinityRegistry::new(),
                connector_running: AtomicBool::new(false),
                connector_handle: Mutex::new(None),
                refresh_running: AtomicBool::new(false),
                reconnect_running: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> RouterState {
        self.shared.state()
    }

    /// Subscribes to state transitions.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.shared.state_tx.subscribe()
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Returns the last observed affinity topology version, if any.
    pub fn topology_version(&self) -> Option<AffinityTopologyVersion> {
        self.shared.affinity.version()
    }

    /// Returns `true` while affinity routing is in effect.
    pub fn partition_awareness_active(&self) -> bool {
        self.shared.pool.partition_awareness_active()
    }

    /// Returns the number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.pool.session_count()
    }

    /// Connects to the cluster: sweeps the endpoint list from a random
    /// starting index and enters `Connected` on the first successful
    /// handshake. The background connector then opens sessions to the
    /// remaining endpoints.
    ///
    /// Fails with `IllegalState` unless the router is `Disconnected`, and
    /// with an aggregated `ConnectionFailed` when every endpoint fails.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        shared
            .transition_from(RouterState::Disconnected, RouterState::Connecting, None)
            .map_err(|actual| GridError::IllegalState(actual.to_string()))?;

        match connect_sweep(shared).await {
            Ok(()) => {
                if shared
                    .transition_from(RouterState::Connecting, RouterState::Connected, None)
                    .is_err()
                {
                    // disconnected while the sweep was still running
                    for session in shared.pool.drain() {
                        session.close().await;
                    }
                    return Err(GridError::IllegalState(shared.state().to_string()));
                }
                trigger_background_connect(shared);
                Ok(())
            }
            Err(err) => {
                shared.set_state(RouterState::Disconnected, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Disconnects: closes every session (pending requests complete with
    /// `LostConnection`) and stops the background connector.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        let prev = shared.set_state(
            RouterState::Disconnected,
            Some("disconnect requested".to_string()),
        );
        if prev == RouterState::Disconnected {
            return;
        }

        await_connector(shared).await;
        for session in shared.pool.drain() {
            session.close().await;
        }
        shared.affinity.clear_caches();
        tracing::info!("client disconnected");
    }

    /// Sends one request, failing over on lost connections.
    ///
    /// When partition awareness is active and `hint` is present, the session
    /// is chosen through the distribution map; otherwise the first live
    /// session is used so that related requests land on the same node. A
    /// `LostConnection` failure removes the dead session and retries on a
    /// random survivor; all other errors surface unmodified.
    pub async fn send<T, W, R>(
        &self,
        op_code: i16,
        write_payload: W,
        read_payload: R,
        hint: Option<&AffinityHint>,
    ) -> Result<T>
    where
        W: Fn(&mut BinaryWriter) -> Result<()>,
        R: Fn(&mut BinaryReader) -> Result<T>,
    {
        let shared = &self.shared;
        let mut retrying = false;

        loop {
            let state = shared.state();
            if state != RouterState::Connected {
                return Err(GridError::IllegalState(state.to_string()));
            }

            let session = if retrying {
                shared.pool.random_session().ok()
            } else {
                self.choose_session(hint)
            };
            let Some(session) = session else {
                spawn_reconnect(shared);
                return Err(GridError::LostConnection(
                    "Cluster is unavailable".to_string(),
                ));
            };

            match session
                .send_request(op_code, &write_payload, &read_payload)
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) if err.is_lost_connection() => {
                    tracing::warn!(
                        endpoint = %session.endpoint(),
                        error = %err,
                        "session lost mid-request, failing over"
                    );
                    shared.pool.remove_session(session.id());
                    session.close().await;

                    if shared.pool.is_empty() {
                        spawn_reconnect(shared);
                        return Err(GridError::LostConnection(
                            "Cluster is unavailable".to_string(),
                        ));
                    }
                    retrying = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Picks the session for a first attempt.
    fn choose_session(&self, hint: Option<&AffinityHint>) -> Option<Arc<NodeSession>> {
        let shared = &self.shared;

        if shared.pool.partition_awareness_active() {
            if let Some(hint) = hint {
                return match shared.affinity.route(hint) {
                    Route::Node(node) => match shared.pool.session_for_node(&node) {
                        Some(session) => Some(session),
                        // the mapped node has no pooled session; fall back
                        None => shared.pool.random_session().ok(),
                    },
                    Route::Random => shared.pool.random_session().ok(),
                    Route::Unknown => {
                        spawn_affinity_refresh(shared, hint.cache_id);
                        shared.pool.random_session().ok()
                    }
                };
            }
        }

        shared.pool.first_session()
    }
}

async fn connect_sweep(shared: &Arc<RouterShared>) -> Result<()> {
    let endpoints = shared.config.endpoints();
    let observer = observer_for(shared);
    let start = rand::thread_rng().gen_range(0..endpoints.len());
    let mut failures = Vec::new();

    for i in 0..endpoints.len() {
        let endpoint = &endpoints[(start + i) % endpoints.len()];
        match NodeSession::open(endpoint, &shared.config, Arc::clone(&observer)).await {
            Ok(session) => {
                if let Some(displaced) = shared.pool.add_session(session) {
                    displaced.close().await;
                }
                tracing::info!(endpoint = %endpoint, "connected to cluster");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(endpoint = %endpoint, error = %err, "endpoint failed during connect sweep");
                shared
                    .pool
                    .record_connect_failure(endpoint, shared.config.backoff());
                failures.push(format!("{}: {}", endpoint, err));
            }
        }
    }

    Err(GridError::ConnectionFailed(failures.join("; ")))
}

/// Reacts to a session disappearing: a total loss goes through `reconnect`,
/// a partial one just nudges the background connector.
fn handle_session_lost(shared: &Arc<RouterShared>) {
    if shared.pool.is_empty() {
        spawn_reconnect(shared);
    } else {
        trigger_background_connect(shared);
    }
}

fn spawn_reconnect(shared: &Arc<RouterShared>) {
    if shared.reconnect_running.swap(true, Ordering::SeqCst) {
        return;
    }
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        reconnect(&shared).await;
        shared.reconnect_running.store(false, Ordering::SeqCst);
    });
}

async fn reconnect(shared: &Arc<RouterShared>) {
    if shared
        .transition_from(
            RouterState::Connected,
            RouterState::Connecting,
            Some("all sessions lost".to_string()),
        )
        .is_err()
    {
        return;
    }

    // let the background connector quiesce so a half-open socket cannot
    // race the sweep
    await_connector(shared).await;

    match connect_sweep(shared).await {
        Ok(()) => {
            if shared
                .transition_from(RouterState::Connecting, RouterState::Connected, None)
                .is_err()
            {
                for session in shared.pool.drain() {
                    session.close().await;
                }
                return;
            }
            trigger_background_connect(shared);
        }
        Err(err) => {
            tracing::error!(error = %err, "reconnect sweep failed");
            shared.set_state(RouterState::Disconnected, Some(err.to_string()));
        }
    }
}

/// Starts the background connector unless one is already running.
///
/// The connector exists to reach "one session per reachable node" under
/// partition awareness; without it a single session is all the router needs.
fn trigger_background_connect(shared: &Arc<RouterShared>) {
    if !shared.config.partition_awareness() {
        return;
    }
    if !shared.pool.has_inactive() {
        return;
    }
    if shared.connector_running.swap(true, Ordering::SeqCst) {
        return;
    }

    let task_shared = Arc::clone(shared);
    let handle = tokio::spawn(async move {
        background_connect(&task_shared).await;
        task_shared.connector_running.store(false, Ordering::SeqCst);
    });
    *shared
        .connector_handle
        .lock()
        .expect("connector handle poisoned") = Some(handle);
}

/// How often the background connector re-checks for due endpoints while some
/// remain inactive. Individual endpoints are still paced by their own
/// exponential backoff; this only bounds how promptly a due endpoint is
/// noticed and how quickly the task observes a state change.
const CONNECTOR_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

async fn background_connect(shared: &Arc<RouterShared>) {
    let observer = observer_for(shared);

    loop {
        if shared.state() != RouterState::Connected {
            return;
        }

        for endpoint in shared.pool.due_endpoints() {
            if shared.state() != RouterState::Connected {
                return;
            }

            match NodeSession::open(&endpoint, &shared.config, Arc::clone(&observer)).await {
                Ok(session) => {
                    if shared.state() != RouterState::Connected {
                        // the router left Connected while this socket was opening
                        session.close().await;
                        return;
                    }
                    if let Some(displaced) = shared.pool.add_session(session) {
                        displaced.close().await;
                    }
                    tracing::debug!(endpoint = %endpoint, "background connect opened session");
                }
                Err(err) => {
                    shared
                        .pool
                        .record_connect_failure(&endpoint, shared.config.backoff());
                    tracing::debug!(endpoint = %endpoint, error = %err, "background connect attempt failed");
                }
            }
        }

        if !shared.pool.has_inactive() {
            return;
        }
        tokio::time::sleep(CONNECTOR_POLL_INTERVAL).await;
    }
}

async fn await_connector(shared: &Arc<RouterShared>) {
    let handle = shared
        .connector_handle
        .lock()
        .expect("connector handle poisoned")
        .take();
    if let Some(handle) = handle {
        let _ = handle.await;
    }
}

/// Fires a non-blocking distribution map refresh for one cache.
///
/// The refresh goes through the router's own `send` with no hint, so it
/// lands on an arbitrary node. Failures are logged and dropped; the next
/// request for the cache fires a new refresh.
fn spawn_affinity_refresh(shared: &Arc<RouterShared>, cache_id: i32) {
    if shared.refresh_running.swap(true, Ordering::SeqCst) {
        return;
    }

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let router = Router {
            shared: Arc::clone(&shared),
        };
        let result = router
            .send(
                OP_CACHE_PARTITIONS,
                |w: &mut BinaryWriter| {
                    w.write_i32(1);
                    w.write_i32(cache_id);
                    Ok(())
                },
                |r: &mut BinaryReader| CachePartitionsResponse::read(r),
                None,
            )
            .await;

        match result {
            Ok(response) => shared.affinity.apply_refresh(&response),
            Err(err) => tracing::debug!(
                cache_id,
                error = %err,
                "distribution map refresh failed, dropped"
            ),
        }
        shared.refresh_running.store(false, Ordering::SeqCst);
    });
}

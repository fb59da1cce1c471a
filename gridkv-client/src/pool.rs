//! The pool of live sessions and the inactive endpoint list.
//!
//! Sessions are keyed by the node id reported in the handshake; a session
//! whose server did not report one is the *legacy* session, of which at most
//! one exists. Every configured endpoint is, at any instant, either active
//! (a session is open to it) or inactive (a candidate for the background
//! connector). All operations here are synchronous and guarded by one mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand::Rng;
use uuid::Uuid;

use gridkv_core::error::{GridError, Result};

use crate::config::BackoffConfig;
use crate::session::{NodeSession, SessionId};

#[derive(Debug)]
struct InactiveEndpoint {
    endpoint: String,
    failed_attempts: u32,
    next_due: Instant,
}

impl InactiveEndpoint {
    fn fresh(endpoint: String) -> Self {
        Self {
            endpoint,
            failed_attempts: 0,
            next_due: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    sessions: HashMap<Uuid, Arc<NodeSession>>,
    legacy: Option<Arc<NodeSession>>,
    inactive: Vec<InactiveEndpoint>,
    partition_awareness_active: bool,
}

impl PoolInner {
    fn live_count(&self) -> usize {
        self.sessions.len() + usize::from(self.legacy.is_some())
    }

    fn snapshot(&self) -> Vec<Arc<NodeSession>> {
        let mut all: Vec<Arc<NodeSession>> = self
            .sessions
            .values()
            .chain(self.legacy.iter())
            .cloned()
            .collect();
        // oldest session first, so "the first session" is stable while the
        // set of sessions does not change
        all.sort_by_key(|s| s.id().value());
        all
    }

    fn mark_active(&mut self, endpoint: &str) {
        self.inactive.retain(|e| e.endpoint != endpoint);
    }

    fn mark_inactive(&mut self, endpoint: &str) {
        if !self.inactive.iter().any(|e| e.endpoint == endpoint) {
            self.inactive.push(InactiveEndpoint::fresh(endpoint.to_string()));
        }
    }
}

/// Tracks live sessions by node id plus the inactive endpoint list.
#[derive(Debug)]
pub struct ConnectionPool {
    endpoints: Vec<String>,
    partition_awareness_requested: bool,
    inner: Mutex<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool over the configured endpoints, all initially inactive.
    pub fn new(endpoints: Vec<String>, partition_awareness_requested: bool) -> Self {
        let inner = PoolInner {
            inactive: endpoints.iter().cloned().map(InactiveEndpoint::fresh).collect(),
            ..PoolInner::default()
        };
        Self {
            endpoints,
            partition_awareness_requested,
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("connection pool poisoned")
    }

    /// Stores a session, displacing and returning any session it replaces
    /// (same node id, or the previous legacy session).
    ///
    /// The caller must close the displaced session; the pool will not.
    pub fn add_session(&self, session: Arc<NodeSession>) -> Option<Arc<NodeSession>> {
        let mut inner = self.lock();

        let displaced = match session.node_id() {
            Some(node_id) if self.partition_awareness_requested => {
                inner.sessions.insert(node_id, Arc::clone(&session))
            }
            _ => inner.legacy.replace(Arc::clone(&session)),
        };

        inner.mark_active(session.endpoint());
        self.recompute_flag(&mut inner);

        tracing::debug!(
            id = %session.id(),
            endpoint = %session.endpoint(),
            node_id = ?session.node_id(),
            live = inner.live_count(),
            "session added to pool"
        );

        displaced
    }

    /// Removes a session by id, returning it when it was present.
    ///
    /// Idempotent: removing a session that was already displaced or removed
    /// is a no-op. The session's endpoint rejoins the inactive list.
    pub fn remove_session(&self, id: SessionId) -> Option<Arc<NodeSession>> {
        let mut inner = self.lock();

        let removed = if let Some(node_id) = inner
            .sessions
            .iter()
            .find(|(_, s)| s.id() == id)
            .map(|(node_id, _)| *node_id)
        {
            inner.sessions.remove(&node_id)
        } else if inner.legacy.as_ref().is_some_and(|s| s.id() == id) {
            inner.legacy.take()
        } else {
            None
        };

        if let Some(session) = &removed {
            inner.mark_inactive(session.endpoint());
            self.recompute_flag(&mut inner);
            tracing::debug!(
                id = %session.id(),
                endpoint = %session.endpoint(),
                live = inner.live_count(),
                "session removed from pool"
            );
        }

        removed
    }

    /// Returns a stable snapshot of all live sessions, oldest first.
    pub fn all_sessions(&self) -> Vec<Arc<NodeSession>> {
        self.lock().snapshot()
    }

    /// Returns the oldest live session, if any.
    pub fn first_session(&self) -> Option<Arc<NodeSession>> {
        self.lock().snapshot().into_iter().next()
    }

    /// Returns a uniformly random live session.
    pub fn random_session(&self) -> Result<Arc<NodeSession>> {
        let snapshot = self.lock().snapshot();
        if snapshot.is_empty() {
            return Err(GridError::LostConnection(
                "no live sessions in the pool".to_string(),
            ));
        }
        let index = rand::thread_rng().gen_range(0..snapshot.len());
        Ok(Arc::clone(&snapshot[index]))
    }

    /// Returns the session for a node id, if one is pooled.
    pub fn session_for_node(&self, node_id: &Uuid) -> Option<Arc<NodeSession>> {
        self.lock().sessions.get(node_id).cloned()
    }

    /// Returns the number of live sessions.
    pub fn session_count(&self) -> usize {
        self.lock().live_count()
    }

    /// Returns `true` if no session is live.
    pub fn is_empty(&self) -> bool {
        self.session_count() == 0
    }

    /// Returns `true` while affinity routing may be used: partition
    /// awareness was requested and at least two sessions are live.
    pub fn partition_awareness_active(&self) -> bool {
        self.lock().partition_awareness_active
    }

    /// Returns the inactive endpoints whose backoff has elapsed.
    pub fn due_endpoints(&self) -> Vec<String> {
        let now = Instant::now();
        self.lock()
            .inactive
            .iter()
            .filter(|e| e.next_due <= now)
            .map(|e| e.endpoint.clone())
            .collect()
    }

    /// Returns `true` if any endpoint is inactive.
    pub fn has_inactive(&self) -> bool {
        !self.lock().inactive.is_empty()
    }

    /// Records a failed connect attempt, pushing the endpoint's next attempt
    /// out by its exponential backoff.
    pub fn record_connect_failure(&self, endpoint: &str, backoff: &BackoffConfig) {
        let mut inner = self.lock();
        if let Some(entry) = inner.inactive.iter_mut().find(|e| e.endpoint == endpoint) {
            entry.failed_attempts = entry.failed_attempts.saturating_add(1);
            let delay = backoff.delay_for_attempt(entry.failed_attempts);
            entry.next_due = Instant::now() + delay;
            tracing::debug!(
                endpoint,
                attempts = entry.failed_attempts,
                backoff = ?delay,
                "endpoint connect failed, backing off"
            );
        }
    }

    /// Empties the pool and restores every configured endpoint to the
    /// inactive list. Returns the drained sessions for the caller to close.
    pub fn drain(&self) -> Vec<Arc<NodeSession>> {
        let mut inner = self.lock();
        let mut drained: Vec<Arc<NodeSession>> = inner.sessions.drain().map(|(_, s)| s).collect();
        if let Some(legacy) = inner.legacy.take() {
            drained.push(legacy);
        }
        inner.inactive = self
            .endpoints
            .iter()
            .cloned()
            .map(InactiveEndpoint::fresh)
            .collect();
        inner.partition_awareness_active = false;
        drained
    }

    fn recompute_flag(&self, inner: &mut PoolInner) {
        inner.partition_awareness_active =
            self.partition_awareness_requested && inner.live_count() >= 2;
    }
}

//! Identity → live connection map.
//!
//! At most one connection per identity: a newer registration replaces the
//! older one without closing its transport, and a late disconnect from the
//! replaced connection must not evict its successor.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use sonar_common::PrefixedId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use super::events::ServerEvent;

/// Unique id of one transport connection (`conn_` prefixed ULID).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl PrefixedId for ConnectionId {
    const PREFIX: &'static str = sonar_common::id::prefix::CONNECTION;
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(<Self as PrefixedId>::generate())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events a connection may have queued before it is considered stalled.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Outbound side of a connection. Cloning it does not create a new connection.
///
/// Events pushed through one handle reach the socket in push order: the
/// queue is FIFO and drained by a single writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
    overflow: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (
            Self {
                id: ConnectionId::new(),
                tx,
                overflow: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue an event. Returns `false` if the connection is already gone or
    /// its queue is full. A full queue drops the event and wakes
    /// [`overflowed`](Self::overflowed).
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    event = event.name(),
                    "outbound queue full, dropping event"
                );
                self.overflow.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Number of events waiting for the writer.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Resolves once an event has been dropped because the queue was full.
    pub async fn overflowed(&self) {
        self.overflow.notified().await;
    }
}

/// Process-wide registry of live connections, keyed by identity.
pub struct ConnectionRegistry {
    inner: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Bind `identity` to `handle`, returning the handle it replaced, if any.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.inner.insert(identity.to_string(), handle)
    }

    /// Remove `identity` only if it is still bound to `connection_id`.
    ///
    /// Returns `false` when the identity was already replaced or never
    /// registered.
    pub fn unregister(&self, identity: &str, connection_id: &ConnectionId) -> bool {
        self.inner
            .remove_if(identity, |_, handle| handle.id() == connection_id)
            .is_some()
    }

    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.inner.get(identity).map(|entry| entry.value().clone())
    }

    pub fn all_identities(&self) -> BTreeSet<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of every (identity, handle) pair, for fan-out.
    pub fn handles(&self) -> Vec<(String, ConnectionHandle)> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.inner.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

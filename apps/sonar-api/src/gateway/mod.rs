pub mod activity;
pub mod events;
pub mod fanout;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::db::messages::MessageStore;

use activity::ActivityTracker;
use presence::PresenceBroadcaster;
use registry::ConnectionRegistry;
use relay::MessageRelay;

/// Process-wide real-time state shared by every socket session.
#[derive(Clone)]
pub struct Gateway {
    pub connections: Arc<ConnectionRegistry>,
    pub activities: Arc<ActivityTracker>,
    pub presence: Arc<PresenceBroadcaster>,
    pub relay: Arc<MessageRelay>,
    shutdown: Arc<watch::Sender<bool>>,
    live_sockets: Arc<AtomicUsize>,
}

impl Gateway {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let activities = Arc::new(ActivityTracker::new());
        let presence = Arc::new(PresenceBroadcaster::new(
            connections.clone(),
            activities.clone(),
        ));
        let relay = Arc::new(MessageRelay::new(connections.clone(), store));

        let (shutdown, _) = watch::channel(false);

        Self {
            connections,
            activities,
            presence,
            relay,
            shutdown: Arc::new(shutdown),
            live_sockets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ask every open socket to close with a normal going-away frame.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Receiver that flips to `true` once [`shutdown`](Self::shutdown) is called.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Count a socket task as live until the returned guard is dropped.
    pub fn track_socket(&self) -> SocketGuard {
        self.live_sockets.fetch_add(1, Ordering::SeqCst);
        SocketGuard {
            live: self.live_sockets.clone(),
        }
    }

    pub fn live_sockets(&self) -> usize {
        self.live_sockets.load(Ordering::SeqCst)
    }

    /// Wait up to `limit` for every socket task to finish. Returns `false` if
    /// some were still running.
    pub async fn drain(&self, limit: Duration) -> bool {
        let deadline = time::Instant::now() + limit;
        while self.live_sockets() > 0 {
            if time::Instant::now() >= deadline {
                return false;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

/// Keeps a socket task counted by [`Gateway::live_sockets`].
pub struct SocketGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

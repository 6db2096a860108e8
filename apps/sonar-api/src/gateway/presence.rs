//! Presence announcements: arrivals, departures, and activity changes.
//!
//! Presence is per-**identity** with last-connect-wins semantics. Every
//! transition that touches the registry or the tracker runs under one lock so
//! that snapshots handed to newcomers are exact and all peers see the same
//! sequence of presence events.

use std::sync::Arc;

use parking_lot::Mutex;

use super::activity::{self, ActivityTracker, DEFAULT_ACTIVITY};
use super::events::{ActivityUpdate, ServerEvent};
use super::fanout::{self, Delivery};
use super::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};

/// Online users and their activities at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub users: Vec<String>,
    pub activities: Vec<(String, String)>,
}

pub struct PresenceBroadcaster {
    connections: Arc<ConnectionRegistry>,
    activities: Arc<ActivityTracker>,
    transitions: Mutex<()>,
}

impl PresenceBroadcaster {
    pub fn new(connections: Arc<ConnectionRegistry>, activities: Arc<ActivityTracker>) -> Self {
        Self {
            connections,
            activities,
            transitions: Mutex::new(()),
        }
    }

    /// Register `handle` for `identity` and announce the arrival.
    ///
    /// Everyone else gets `user_connected`; the newcomer gets `users_online`
    /// (itself included) followed by `activities`.
    pub fn connect(&self, identity: &str, handle: ConnectionHandle) {
        let _guard = self.transitions.lock();
        let deliveries = self.plan_connect(identity, handle);
        fanout::dispatch(deliveries);
    }

    fn plan_connect(&self, identity: &str, handle: ConnectionHandle) -> Vec<Delivery> {
        if let Some(replaced) = self.connections.register(identity, handle.clone()) {
            tracing::debug!(
                user_id = %identity,
                replaced = %replaced.id(),
                connection_id = %handle.id(),
                "connection replaced by newer one"
            );
        }
        self.activities.set_activity(identity, DEFAULT_ACTIVITY);

        let peers: Vec<ConnectionHandle> = self
            .connections
            .handles()
            .into_iter()
            .map(|(_, h)| h)
            .collect();

        let mut deliveries = fanout::broadcast(
            &peers,
            &ServerEvent::UserConnected(identity.to_string()),
            Some(handle.id()),
        );

        let online = self.connections.all_identities().into_iter().collect();
        deliveries.push(Delivery::new(handle.clone(), ServerEvent::UsersOnline(online)));
        deliveries.push(Delivery::new(
            handle,
            ServerEvent::Activities(self.activities.snapshot()),
        ));
        deliveries
    }

    /// Record a new activity label and broadcast it to everyone, the origin included.
    ///
    /// Labels longer than [`activity::MAX_ACTIVITY_CHARS`] are truncated. Ignored (returns `false`) unless `connection_id` is the identity's
    /// current connection.
    pub fn update_activity(&self, identity: &str, connection_id: &ConnectionId, label: &str) -> bool {
        let _guard = self.transitions.lock();

        let is_current = self
            .connections
            .lookup(identity)
            .is_some_and(|h| h.id() == connection_id);
        if !is_current {
            tracing::debug!(user_id = %identity, %connection_id, "activity update from stale connection");
            return false;
        }

        let label = activity::clamp_label(label);
        self.activities.set_activity(identity, label);

        let peers: Vec<ConnectionHandle> = self
            .connections
            .handles()
            .into_iter()
            .map(|(_, h)| h)
            .collect();
        let event = ServerEvent::ActivityUpdate(ActivityUpdate {
            user_id: identity.to_string(),
            activity: label.to_string(),
        });
        fanout::dispatch(fanout::broadcast(&peers, &event, None));
        true
    }

    /// Drop `identity` if it is still bound to `connection_id` and announce the
    /// departure. A disconnect from an already replaced connection does nothing.
    pub fn disconnect(&self, identity: &str, connection_id: &ConnectionId) -> bool {
        let _guard = self.transitions.lock();

        if !self.connections.unregister(identity, connection_id) {
            tracing::debug!(user_id = %identity, %connection_id, "stale disconnect ignored");
            return false;
        }
        self.activities.clear(identity);

        let peers: Vec<ConnectionHandle> = self
            .connections
            .handles()
            .into_iter()
            .map(|(_, h)| h)
            .collect();
        fanout::dispatch(fanout::broadcast(
            &peers,
            &ServerEvent::UserDisconnected(identity.to_string()),
            None,
        ));
        true
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        let _guard = self.transitions.lock();
        PresenceSnapshot {
            users: self.connections.all_identities().into_iter().collect(),
            activities: self.activities.snapshot(),
        }
    }
}

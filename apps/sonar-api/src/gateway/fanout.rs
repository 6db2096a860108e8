//! Delivery planning and dispatch.
//!
//! Presence and relay logic never write to sockets directly. They build a list
//! of [`Delivery`] values and hand it to [`dispatch`], which pushes each event
//! onto the target connection's outbound queue. Sends are fire-and-forget: a
//! connection that has already gone away is skipped.

use super::events::ServerEvent;
use super::registry::{ConnectionHandle, ConnectionId};

/// One event bound for one connection.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub target: ConnectionHandle,
    pub event: ServerEvent,
}

impl Delivery {
    pub fn new(target: ConnectionHandle, event: ServerEvent) -> Self {
        Self { target, event }
    }
}

/// Plan `event` for every handle, optionally skipping one connection.
pub fn broadcast<'a, I>(handles: I, event: &ServerEvent, except: Option<&ConnectionId>) -> Vec<Delivery>
where
    I: IntoIterator<Item = &'a ConnectionHandle>,
{
    handles
        .into_iter()
        .filter(|h| !matches!(except, Some(skip) if h.id() == skip))
        .map(|h| Delivery::new(h.clone(), event.clone()))
        .collect()
}

/// Send every planned delivery in order. Returns how many were queued.
pub fn dispatch(deliveries: Vec<Delivery>) -> usize {
    let mut delivered = 0;
    for Delivery { target, event } in deliveries {
        let name = event.name();
        if target.send(event) {
            delivered += 1;
        } else {
            tracing::debug!(
                connection_id = %target.id(),
                event = name,
                "dropping event for closed connection"
            );
        }
    }
    delivered
}

//! Per-connection session state machine.
//!
//! ```text
//! Unauthenticated ──token ok──▶ Authenticating ──user_connected──▶ Active ──close──▶ Terminated
//!        │                            │
//!        └────────── failure ─────────┴──────────────────────────────────────────▶ Terminated
//! ```
//!
//! Transitions only move forward. The session owns no transport: it talks to
//! the shared [`Gateway`] and to its own [`ConnectionHandle`], which keeps it
//! testable without sockets.

use crate::auth::identity::{HandshakeContext, IdentityResolver};

use super::events::ClientEvent;
use super::registry::{ConnectionHandle, ConnectionId};
use super::Gateway;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, nothing proven yet.
    Unauthenticated,
    /// Token verified; waiting for the client's `user_connected` confirmation.
    Authenticating { identity: String },
    /// Registered and announced. Inbound events are routed.
    Active { identity: String },
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Identity does not match credentials")]
    IdentityMismatch,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Session terminated")]
    Terminated,
}

/// Close codes (4000-range for application-level).
pub mod close_code {
    /// Standard "going away", sent when the server shuts down.
    pub const GOING_AWAY: u16 = 1001;
    /// Standard "policy violation", sent when a client stops reading.
    pub const QUEUE_OVERFLOW: u16 = 1008;
    pub const INVALID_JSON: u16 = 4000;
    pub const UNKNOWN_EVENT: u16 = 4001;
    pub const NOT_AUTHENTICATED: u16 = 4003;
    pub const AUTH_FAILED: u16 = 4004;
    pub const ALREADY_CONNECTED: u16 = 4005;
    pub const TIMEOUT: u16 = 4009;
}

impl SessionError {
    pub fn close_code(&self) -> u16 {
        match self {
            Self::AuthenticationFailed | Self::IdentityMismatch => close_code::AUTH_FAILED,
            Self::NotAuthenticated | Self::Terminated => close_code::NOT_AUTHENTICATED,
            Self::AlreadyConnected => close_code::ALREADY_CONNECTED,
        }
    }
}

pub struct GatewaySession {
    gateway: Gateway,
    handle: ConnectionHandle,
    state: SessionState,
}

impl GatewaySession {
    pub fn new(gateway: Gateway, handle: ConnectionHandle) -> Self {
        Self {
            gateway,
            handle,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn connection_id(&self) -> &ConnectionId {
        self.handle.id()
    }

    /// The verified identity, once authentication succeeded.
    pub fn identity(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticating { identity } | SessionState::Active { identity } => {
                Some(identity)
            }
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    /// Resolve the handshake credentials into an identity.
    pub async fn authenticate(
        &mut self,
        resolver: &dyn IdentityResolver,
        ctx: &HandshakeContext,
    ) -> Result<&str, SessionError> {
        match self.state {
            SessionState::Unauthenticated => {}
            SessionState::Terminated => return Err(SessionError::Terminated),
            _ => return Err(SessionError::AlreadyConnected),
        }

        match resolver.resolve_identity(ctx).await {
            Some(identity) => {
                self.state = SessionState::Authenticating { identity };
                Ok(self.identity().unwrap_or_default())
            }
            None => {
                self.state = SessionState::Terminated;
                Err(SessionError::AuthenticationFailed)
            }
        }
    }

    /// Route one inbound event according to the current state.
    ///
    /// An `Err` means the connection must be closed with
    /// [`SessionError::close_code`] and then [`terminate`](Self::terminate)d.
    /// Relay failures are not errors here: they are reported to the client as
    /// `message_error` and the session stays active.
    pub async fn handle(&mut self, event: ClientEvent) -> Result<(), SessionError> {
        let state = std::mem::replace(&mut self.state, SessionState::Terminated);
        match (state, event) {
            (SessionState::Authenticating { identity }, ClientEvent::UserConnected(claimed)) => {
                if claimed.trim() != identity {
                    tracing::debug!(
                        user_id = %identity,
                        %claimed,
                        "user_connected claim does not match token"
                    );
                    return Err(SessionError::IdentityMismatch);
                }

                self.gateway.presence.connect(&identity, self.handle.clone());
                tracing::info!(
                    user_id = %identity,
                    connection_id = %self.handle.id(),
                    online = self.gateway.connections.len(),
                    "user connected"
                );
                self.state = SessionState::Active { identity };
                Ok(())
            }
            (SessionState::Unauthenticated | SessionState::Authenticating { .. }, event) => {
                tracing::debug!(event = event.name(), "event before handshake completed");
                Err(SessionError::NotAuthenticated)
            }
            (active @ SessionState::Active { .. }, ClientEvent::UserConnected(_)) => {
                self.state = active;
                Err(SessionError::AlreadyConnected)
            }
            (SessionState::Active { identity }, ClientEvent::ActivityUpdate(payload)) => {
                self.gateway
                    .presence
                    .update_activity(&identity, self.handle.id(), &payload.activity);
                self.state = SessionState::Active { identity };
                Ok(())
            }
            (SessionState::Active { identity }, ClientEvent::SendMessage(payload)) => {
                let result = self
                    .gateway
                    .relay
                    .send(&identity, &self.handle, &payload.receiver_id, &payload.content)
                    .await;
                if let Err(err) = result {
                    tracing::debug!(user_id = %identity, %err, "send_message rejected");
                }
                self.state = SessionState::Active { identity };
                Ok(())
            }
            (SessionState::Terminated, _) => Err(SessionError::Terminated),
        }
    }

    /// Leave the session for good. Announces the departure if this connection
    /// was still the identity's current one. Safe to call more than once.
    pub fn terminate(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Terminated);
        if let SessionState::Active { identity } = state {
            let announced = self.gateway.presence.disconnect(&identity, self.handle.id());
            tracing::info!(
                user_id = %identity,
                connection_id = %self.handle.id(),
                announced,
                "user disconnected"
            );
        }
    }
}

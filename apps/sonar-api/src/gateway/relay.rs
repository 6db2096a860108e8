//! Direct message relay: persist first, then notify.
//!
//! The store write is authoritative. Only a stored message is ever pushed to
//! anyone: `message_sent` to the sending connection and, if the recipient is
//! online on this process, `receive_message` to the recipient's connection.
//! Offline recipients pick the message up later through the history endpoint.

use std::sync::Arc;

use crate::db::messages::MessageStore;
use crate::models::message::Message;

use super::events::ServerEvent;
use super::fanout::{self, Delivery};
use super::registry::{ConnectionHandle, ConnectionRegistry};

/// Upper bound on message length, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Message content is required")]
    EmptyContent,
    #[error("Message content must be 4000 characters or fewer")]
    ContentTooLong,
    #[error("Recipient is required")]
    MissingRecipient,
    #[error("Message contains invalid characters")]
    InvalidCharacters,
    #[error("Failed to send message")]
    Persistence,
}

pub struct MessageRelay {
    connections: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
}

impl MessageRelay {
    pub fn new(connections: Arc<ConnectionRegistry>, store: Arc<dyn MessageStore>) -> Self {
        Self { connections, store }
    }

    /// Relay a message from `sender_id`, the identity bound to `origin`.
    ///
    /// Any failure is reported to `origin` as `message_error` and returned.
    pub async fn send(
        &self,
        sender_id: &str,
        origin: &ConnectionHandle,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, RelayError> {
        let result = self.persist_and_notify(sender_id, origin, receiver_id, content).await;
        if let Err(err) = &result {
            origin.send(ServerEvent::MessageError(err.to_string()));
        }
        result
    }

    async fn persist_and_notify(
        &self,
        sender_id: &str,
        origin: &ConnectionHandle,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, RelayError> {
        let (receiver_id, content) = validate(receiver_id, content)?;

        let message = self
            .store
            .create(sender_id, receiver_id, content)
            .await
            .map_err(|err| {
                tracing::error!(?err, sender_id = %sender_id, receiver_id = %receiver_id, "failed to persist message");
                RelayError::Persistence
            })?;

        let mut deliveries = vec![Delivery::new(
            origin.clone(),
            ServerEvent::MessageSent(message.clone()),
        )];
        if let Some(recipient) = self.connections.lookup(receiver_id) {
            deliveries.push(Delivery::new(
                recipient,
                ServerEvent::ReceiveMessage(message.clone()),
            ));
        }

        let delivered = fanout::dispatch(deliveries);
        tracing::debug!(message_id = message.id, delivered, "message relayed");

        Ok(message)
    }
}

/// Trim and check a send intent. Returns the trimmed recipient and content.
pub fn validate<'a>(receiver_id: &'a str, content: &'a str) -> Result<(&'a str, &'a str), RelayError> {
    let receiver_id = receiver_id.trim();
    if receiver_id.is_empty() {
        return Err(RelayError::MissingRecipient);
    }

    let content = content.trim();
    if content.is_empty() {
        return Err(RelayError::EmptyContent);
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(RelayError::ContentTooLong);
    }
    // Postgres TEXT cannot hold NUL.
    if content.contains('\0') || receiver_id.contains('\0') {
        return Err(RelayError::InvalidCharacters);
    }

    Ok((receiver_id, content))
}

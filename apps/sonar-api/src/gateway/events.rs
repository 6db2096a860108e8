//! Socket events and their wire format.
//!
//! Every frame is a JSON text frame `{"event": "<name>", "data": <payload>}`.
//! Payload fields are snake_case in both directions.

use serde::{Deserialize, Serialize};

use crate::models::message::Message;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake confirmation carrying the identity the client believes it has.
    UserConnected(String),
    ActivityUpdate(ActivityUpdatePayload),
    SendMessage(SendMessagePayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserConnected(_) => "user_connected",
            Self::ActivityUpdate(_) => "activity_update",
            Self::SendMessage(_) => "send_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActivityUpdatePayload {
    /// Accepted but never trusted. The connection's identity is used.
    #[serde(default)]
    pub user_id: Option<String>,
    pub activity: String,
}

/// A send intent. There is deliberately no sender field: unknown keys such as
/// `sender_id` are dropped during parsing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendMessagePayload {
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub content: String,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UsersOnline(Vec<String>),
    Activities(Vec<(String, String)>),
    UserConnected(String),
    UserDisconnected(String),
    ActivityUpdate(ActivityUpdate),
    ReceiveMessage(Message),
    MessageSent(Message),
    MessageError(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityUpdate {
    pub user_id: String,
    pub activity: String,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UsersOnline(_) => "users_online",
            Self::Activities(_) => "activities",
            Self::UserConnected(_) => "user_connected",
            Self::UserDisconnected(_) => "user_disconnected",
            Self::ActivityUpdate(_) => "activity_update",
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageSent(_) => "message_sent",
            Self::MessageError(_) => "message_error",
        }
    }
}

/// Why an inbound frame could not be turned into a [`ClientEvent`].
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Not JSON, or not an `{event, data}` object.
    InvalidJson,
    /// Well-formed frame naming an event we don't accept.
    UnknownEvent(String),
    /// Known event with a payload of the wrong shape.
    InvalidPayload(&'static str),
}

const KNOWN_EVENTS: [&str; 3] = ["user_connected", "activity_update", "send_message"];

/// Parse a text frame, distinguishing unknown events from malformed payloads.
pub fn decode(text: &str) -> Result<ClientEvent, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| DecodeError::InvalidJson)?;

    let name = value
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or(DecodeError::InvalidJson)?;

    let Some(&known) = KNOWN_EVENTS.iter().find(|e| **e == name) else {
        return Err(DecodeError::UnknownEvent(name.to_string()));
    };

    serde_json::from_value(value).map_err(|_| DecodeError::InvalidPayload(known))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_client_events() {
        assert_eq!(
            decode(r#"{"event":"user_connected","data":"u1"}"#).unwrap(),
            ClientEvent::UserConnected("u1".into())
        );

        let activity = decode(
            r#"{"event":"activity_update","data":{"user_id":"u9","activity":"Listening to X"}}"#,
        )
        .unwrap();
        assert_eq!(
            activity,
            ClientEvent::ActivityUpdate(ActivityUpdatePayload {
                user_id: Some("u9".into()),
                activity: "Listening to X".into(),
            })
        );
    }

    #[test]
    fn send_message_ignores_sender_fields() {
        let event = decode(
            r#"{"event":"send_message","data":{"sender_id":"mallory","senderId":"mallory","receiver_id":"u2","content":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage(SendMessagePayload {
                receiver_id: "u2".into(),
                content: "hi".into(),
            })
        );
    }

    #[test]
    fn camel_case_fields_are_not_recognised() {
        let event = decode(r#"{"event":"send_message","data":{"receiverId":"u2","content":"hi"}}"#)
            .unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage(SendMessagePayload {
                receiver_id: String::new(),
                content: "hi".into(),
            })
        );
    }

    #[test]
    fn missing_send_fields_default_to_empty() {
        let event = decode(r#"{"event":"send_message","data":{}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage(SendMessagePayload {
                receiver_id: String::new(),
                content: String::new(),
            })
        );
    }

    #[test]
    fn decode_errors_are_classified() {
        assert_eq!(decode("not json"), Err(DecodeError::InvalidJson));
        assert_eq!(decode(r#"{"data":1}"#), Err(DecodeError::InvalidJson));
        assert_eq!(
            decode(r#"{"event":"typing","data":{}}"#),
            Err(DecodeError::UnknownEvent("typing".into()))
        );
        assert_eq!(
            decode(r#"{"event":"activity_update","data":{"label":1}}"#),
            Err(DecodeError::InvalidPayload("activity_update"))
        );
    }

    #[test]
    fn server_events_use_event_data_envelope() {
        let v = serde_json::to_value(ServerEvent::UsersOnline(vec!["u1".into(), "u2".into()]))
            .unwrap();
        assert_eq!(v, json!({ "event": "users_online", "data": ["u1", "u2"] }));

        let v = serde_json::to_value(ServerEvent::Activities(vec![(
            "u1".into(),
            "Idle".into(),
        )]))
        .unwrap();
        assert_eq!(v, json!({ "event": "activities", "data": [["u1", "Idle"]] }));

        let v = serde_json::to_value(ServerEvent::ActivityUpdate(ActivityUpdate {
            user_id: "u1".into(),
            activity: "Idle".into(),
        }))
        .unwrap();
        assert_eq!(
            v,
            json!({ "event": "activity_update", "data": { "user_id": "u1", "activity": "Idle" } })
        );

        let v = serde_json::to_value(ServerEvent::MessageError("nope".into())).unwrap();
        assert_eq!(v["event"], ServerEvent::MessageError(String::new()).name());
        assert_eq!(v["data"], "nope");
    }
}

//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;

use crate::auth::identity::HandshakeContext;
use crate::config::SocketTimeouts;
use crate::AppState;

use super::events::{self, DecodeError, ServerEvent};
use super::registry::ConnectionHandle;
use super::session::{close_code, GatewaySession};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Close code plus human-readable reason.
type CloseReason = (u16, String);

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    pub token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/socket", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ctx = HandshakeContext::from_request(&headers, params.token);
    ws.on_upgrade(move |socket| handle_connection(socket, state, ctx))
}

async fn handle_connection(socket: WebSocket, state: AppState, ctx: HandshakeContext) {
    let _live = state.gateway.track_socket();
    let timeouts = state.config.socket;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, outbound) = ConnectionHandle::channel();
    let mut session = GatewaySession::new(state.gateway.clone(), handle.clone());

    // Step 1: resolve the handshake credentials.
    let authenticated = session
        .authenticate(state.auth.as_ref(), &ctx)
        .await
        .map(|_| ());
    if let Err(err) = authenticated {
        tracing::debug!(connection_id = %session.connection_id(), %err, "socket authentication failed");
        let _ = send_close(&mut ws_tx, err.close_code(), "Authentication failed").await;
        return;
    }

    // Step 2: wait for the matching `user_connected` within the timeout.
    let confirmed = time::timeout(
        timeouts.confirm,
        await_confirmation(&mut session, &mut ws_rx),
    )
    .await;

    match confirmed {
        Ok(Ok(())) => {}
        Ok(Err(Some((code, reason)))) => {
            let _ = send_close(&mut ws_tx, code, &reason).await;
            session.terminate();
            return;
        }
        Ok(Err(None)) => {
            session.terminate();
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, close_code::TIMEOUT, "Handshake timeout").await;
            session.terminate();
            return;
        }
    }

    // Step 3: run the session. The writer owns the sink; the reader loop below
    // owns the stream and the session.
    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_loop(ws_tx, outbound, close_rx, timeouts.ping_interval));

    let shutdown = state.gateway.shutdown_receiver();
    let close = read_loop(&mut session, &mut ws_rx, &handle, shutdown, timeouts).await;

    session.terminate();
    if let Some(reason) = close {
        let _ = close_tx.send(reason);
    } else {
        drop(close_tx);
    }

    if time::timeout(timeouts.writer_drain, &mut writer)
        .await
        .is_err()
    {
        tracing::debug!(connection_id = %session.connection_id(), "writer did not drain in time");
        writer.abort();
    }
}

/// Read frames until the first event, which must be `user_connected`.
///
/// `Err(None)` means the client went away; `Err(Some(_))` carries the close
/// frame to send.
async fn await_confirmation(
    session: &mut GatewaySession,
    ws_rx: &mut WsStream,
) -> Result<(), Option<CloseReason>> {
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Binary(_)) => {
                return Err(Some((close_code::INVALID_JSON, "Invalid JSON".into())));
            }
            Ok(Message::Close(_)) => return Err(None),
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(?e, "ws read error during handshake");
                return Err(None);
            }
        };

        let event = events::decode(&text).map_err(|err| Some(decode_close(&err)))?;
        return session
            .handle(event)
            .await
            .map_err(|err| Some((err.close_code(), err.to_string())));
    }
    Err(None)
}

/// Route inbound events until the connection ends. Returns the close frame to
/// send, if the server is the one closing.
async fn read_loop(
    session: &mut GatewaySession,
    ws_rx: &mut WsStream,
    handle: &ConnectionHandle,
    mut shutdown: watch::Receiver<bool>,
    timeouts: SocketTimeouts,
) -> Option<CloseReason> {
    loop {
        let next = tokio::select! {
            next = time::timeout(timeouts.idle, ws_rx.next()) => next,

            _ = handle.overflowed() => {
                tracing::warn!(connection_id = %session.connection_id(), "client not reading, closing");
                return Some((close_code::QUEUE_OVERFLOW, "Outbound queue full".into()));
            }

            _ = shutdown.wait_for(|stopping| *stopping) => {
                return Some((close_code::GOING_AWAY, "Server shutting down".into()));
            }
        };

        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                tracing::debug!(?e, connection_id = %session.connection_id(), "ws read error");
                return None;
            }
            Ok(None) => return None,
            Err(_elapsed) => {
                tracing::debug!(connection_id = %session.connection_id(), "connection idle, closing");
                return Some((close_code::TIMEOUT, "Connection timed out".into()));
            }
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Binary(_) => return Some((close_code::INVALID_JSON, "Invalid JSON".into())),
            Message::Close(_) => return None,
            // Pings and pongs only refresh the idle deadline.
            _ => continue,
        };

        let event = match events::decode(&text) {
            Ok(event) => event,
            Err(err) => return Some(decode_close(&err)),
        };

        if let Err(err) = session.handle(event).await {
            return Some((err.close_code(), err.to_string()));
        }
    }
}

/// Drain the connection's outbound queue into the socket and keep it pinged.
async fn write_loop(
    mut ws_tx: WsSink,
    mut outbound: mpsc::Receiver<ServerEvent>,
    mut close: oneshot::Receiver<CloseReason>,
    ping_interval: Duration,
) {
    let mut ping = time::interval(ping_interval);
    ping.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut ws_tx, &event).await.is_err() {
                    break;
                }
            }

            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            reason = &mut close => {
                // Closed by the client: nothing left to say.
                let Ok((code, reason)) = reason else { break };

                // Flush anything queued before the close was decided.
                while let Ok(event) = outbound.try_recv() {
                    if send_event(&mut ws_tx, &event).await.is_err() {
                        return;
                    }
                }
                let _ = send_close(&mut ws_tx, code, &reason).await;
                break;
            }
        }
    }
}

async fn send_event(ws_tx: &mut WsSink, event: &ServerEvent) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(?err, event = event.name(), "failed to encode event");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await
}

fn decode_close(err: &DecodeError) -> CloseReason {
    match err {
        DecodeError::InvalidJson => (close_code::INVALID_JSON, "Invalid JSON".into()),
        DecodeError::UnknownEvent(_) => (close_code::UNKNOWN_EVENT, "Unknown event".into()),
        DecodeError::InvalidPayload(event) => {
            (close_code::INVALID_JSON, format!("Invalid {event} payload"))
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}

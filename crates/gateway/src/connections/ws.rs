//! WebSocket endpoint for agent connections.
//!
//! Flow:
//! 1. Agent registers over HTTP and gets a `session_id`
//! 2. Agent connects to `/v1/leitl/ws/:session_id`
//! 3. Coordinator sends `connection.established`
//! 4. Message loop: agent sends `heartbeat` / `broadcast` / `ping`,
//!    coordinator pushes `event` messages from every broadcast
//!
//! Closing the socket unregisters the connection only; the session stays
//! alive until it is ended or stops heartbeating.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use leitl_domain::trace::TraceEvent;
use leitl_domain::Error;
use leitl_protocol::{InboundMessage, OutboundMessage};

use crate::api::error_response;
use crate::coordinator::hub::ConnectionId;
use crate::coordinator::sessions::HeartbeatOutcome;
use crate::coordinator::Coordinator;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/leitl/ws/:session_id: upgrade to WebSocket.  Unknown or ended
/// sessions are refused with 404 before the upgrade.
pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(e) = state.coordinator.sessions.require(&session_id).await {
        return error_response(e);
    }

    let coordinator = state.coordinator.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, coordinator, session_id))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, coordinator: Arc<Coordinator>, session_id: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // The hub holds the only sender.  When the hub drops it (session ended
    // or delivery failed) the writer sees end-of-channel and we close.
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<OutboundMessage>(coordinator.config.events.connection_buffer.max(1));
    let hub = coordinator.hub.clone();

    // The session may have ended between the upgrade check and now.
    let conn_id = match coordinator
        .sessions
        .attach(&session_id, Arc::new(outbound_tx))
        .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::debug!(session_id = %session_id, "session ended before the socket attached");
            let _ = ws_sink.send(Message::Close(None)).await;
            return;
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "could not attach websocket");
            let _ = ws_sink.send(Message::Close(None)).await;
            return;
        }
    };

    TraceEvent::ConnectionOpened {
        session_id: session_id.clone(),
        connection_id: conn_id,
    }
    .emit();

    hub.send_to(
        &session_id,
        conn_id,
        OutboundMessage::ConnectionEstablished {
            session_id: session_id.clone(),
            timestamp: Utc::now(),
        },
    );

    // Writer task: forwards outbound channel messages to the WS sink.
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if send_ws_message(&mut ws_sink, &msg).await.is_err() {
                return;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    // Reader loop: process inbound messages until either side goes away.
    let mut writer_done = false;
    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&coordinator, &session_id, conn_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary frames are ignored; axum answers ping/pong itself.
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    hub.unregister(&session_id, conn_id);
    if !writer_done {
        writer.abort();
    }

    TraceEvent::ConnectionClosed {
        session_id: session_id.clone(),
        connection_id: conn_id,
    }
    .emit();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &OutboundMessage,
) -> Result<(), ()> {
    let json = msg.to_json().map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

/// Decode a text frame into a message the coordinator acts on.
fn decode_inbound(text: &str) -> leitl_domain::Result<InboundMessage> {
    let msg = InboundMessage::parse(text).map_err(|e| Error::Protocol(e.to_string()))?;
    if let InboundMessage::Broadcast { event_type, .. } = &msg {
        if event_type.trim().is_empty() {
            return Err(Error::Protocol("broadcast without event_type".into()));
        }
    }
    Ok(msg)
}

/// Dispatch one text frame.  Malformed frames are dropped; the
/// connection stays open.
async fn handle_inbound(
    coordinator: &Coordinator,
    session_id: &str,
    conn_id: ConnectionId,
    text: &str,
) {
    let msg = match decode_inbound(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(session_id, error = %e, "dropping inbound message");
            return;
        }
    };

    match msg {
        InboundMessage::Heartbeat { current_task } => {
            match coordinator.sessions.heartbeat(session_id, current_task).await {
                Ok(HeartbeatOutcome::Refreshed(_)) => {
                    coordinator.hub.send_to(
                        session_id,
                        conn_id,
                        OutboundMessage::HeartbeatConfirmed {
                            timestamp: Utc::now(),
                        },
                    );
                }
                Ok(HeartbeatOutcome::UnknownSession) => {}
                Err(e) => tracing::warn!(session_id, error = %e, "websocket heartbeat failed"),
            }
        }
        InboundMessage::Broadcast { event_type, data } => {
            coordinator.events.broadcast(&event_type, session_id, data).await;
        }
        InboundMessage::Ping => {
            coordinator.hub.send_to(
                session_id,
                conn_id,
                OutboundMessage::Pong {
                    timestamp: Utc::now(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_frames() {
        assert_eq!(decode_inbound(r#"{"type":"ping"}"#).unwrap(), InboundMessage::Ping);
        assert!(matches!(
            decode_inbound(r#"{"type":"broadcast","event_type":"build.done"}"#).unwrap(),
            InboundMessage::Broadcast { .. }
        ));
    }

    #[test]
    fn bad_frames_are_protocol_errors() {
        for frame in [
            "{not json",
            r#"{"type":"subscribe"}"#,
            r#"{"type":"broadcast","event_type":"  "}"#,
        ] {
            assert!(matches!(decode_inbound(frame), Err(Error::Protocol(_))), "{frame}");
        }
    }
}

//! WebSocket attach point for live notifications.
//!
//! One socket per device/tab; the registry holds all of a user's sessions.
//! The socket task forwards registry events as JSON text frames and drains
//! inbound frames without interpreting them (pings keep the connection
//! alive). The user identity comes from the route; validating identity
//! tokens is the authentication service's concern upstream of this gateway.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use taskio_core::models::UserId;

use crate::http::AppState;

/// WebSocket handler for per-user notification streams
pub async fn websocket_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = UserId::from_string(user_id);

    // Notification frames are small JSON documents; 64KB is generous.
    ws.max_message_size(64 * 1024)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let (session_id, mut events) = state.registry.connect(user_id.clone());
    info!(
        user_id = %user_id.as_str(),
        session_id = %session_id.as_str(),
        "WebSocket session opened"
    );

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                // None means the registry evicted this session.
                let Some(event) = event else { break };
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize event, skipping");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    debug!(error = %e, "WebSocket send failed, closing session");
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Inbound payloads are drained and ignored.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket receive error, closing session");
                        break;
                    }
                }
            }
        }
    }

    state.registry.disconnect(&user_id, &session_id);
    info!(
        user_id = %user_id.as_str(),
        session_id = %session_id.as_str(),
        "WebSocket session closed"
    );
}

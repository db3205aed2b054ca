//! WebSocket Handler
//!
//! Voice signaling transport: one reader loop and one writer task per socket.

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use voxmesh_common::protocol::{ClientEvent, ServerEvent};

use crate::api::AppState;
use crate::voice::{self, EventSender, SessionContext};

/// WebSocket upgrade handler.
pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to the WebSocket
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.session_queue_size);

    let session = SessionContext {
        session_id: Uuid::new_v4(),
        connection_id: Uuid::new_v4(),
    };
    state
        .directory
        .register(session.connection_id, session.session_id, tx.clone());

    info!(
        session_id = %session.session_id,
        connection_id = %session.connection_id,
        "WebSocket connected"
    );

    // Send ready event
    let _ = tx
        .send(ServerEvent::Ready {
            session_id: session.session_id,
            connection_id: session.connection_id,
        })
        .await;

    // Spawn task to forward events to WebSocket
    let sender_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let msg = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_client_message(text.as_str(), session, &state, &tx).await;
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session.session_id, "WebSocket closed");
                break;
            }
            Err(e) => {
                warn!(session_id = %session.session_id, "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    state.registry.disconnect(session.session_id).await;
    state
        .directory
        .unregister(session.connection_id, session.session_id);
    sender_handle.abort();

    info!(session_id = %session.session_id, "WebSocket disconnected");
}

/// Handle a client message. Failures are reported to the client as `error` events.
async fn handle_client_message(
    text: &str,
    session: SessionContext,
    state: &AppState,
    tx: &EventSender,
) {
    let result = match ClientEvent::from_json(text) {
        Ok(ClientEvent::Ping) => {
            let _ = tx.send(ServerEvent::Pong).await;
            Ok(())
        }
        Ok(event) => {
            debug!(session_id = %session.session_id, event = ?event, "Client event");
            voice::handle_voice_event(&state.registry, &state.directory, session, event, tx).await
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        warn!(session_id = %session.session_id, "Error handling message: {}", e);
        let _ = tx.send(ServerEvent::error(e.code(), e.to_string())).await;
    }
}

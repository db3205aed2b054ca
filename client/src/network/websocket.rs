//! WebSocket Connection Manager
//!
//! Keeps the signaling connection open with automatic reconnection and feeds
//! server events into the voice session queue.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use voxmesh_common::protocol::{ClientEvent, ServerEvent};

use crate::session::{EventSender, SessionEvent};

/// Interval between keepalive pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of the outbound event queue.
const OUTBOUND_QUEUE: usize = 100;

/// Connection status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
}

/// Transport activity reported to the session.
#[derive(Debug)]
pub enum SignalingEvent {
    /// The socket is open; a `ready` event follows.
    Connected,
    Server(ServerEvent),
    /// The socket closed. Everything negotiated through it is void.
    Disconnected,
}

/// Signaling connection state.
pub struct SignalingClient {
    /// Channel to send events to the WebSocket.
    tx: mpsc::Sender<ClientEvent>,
    /// Connection status.
    status: Arc<RwLock<ConnectionStatus>>,
    /// Handle for shutdown.
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SignalingClient {
    /// Start the connection task.
    pub fn connect(ws_url: Url, events: EventSender) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(OUTBOUND_QUEUE);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let status = Arc::new(RwLock::new(ConnectionStatus::Connecting));

        let status_clone = status.clone();
        tokio::spawn(async move {
            connection_loop(ws_url, events, event_rx, shutdown_rx, status_clone).await;
        });

        Self {
            tx: event_tx,
            status,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Sender for outbound events. Events queued while disconnected are dropped.
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.tx.clone()
    }

    /// Get the current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

/// Main connection loop with reconnection logic.
async fn connection_loop(
    ws_url: Url,
    events: EventSender,
    mut event_rx: mpsc::Receiver<ClientEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    status: Arc<RwLock<ConnectionStatus>>,
) {
    let mut attempt = 0u32;
    let max_backoff = Duration::from_secs(30);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            info!("WebSocket shutdown requested");
            *status.write().await = ConnectionStatus::Disconnected;
            return;
        }

        info!(url = %ws_url, "Connecting to signaling server");
        *status.write().await = if attempt > 0 {
            ConnectionStatus::Reconnecting { attempt }
        } else {
            ConnectionStatus::Connecting
        };

        match connect_async(ws_url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("WebSocket connected");
                attempt = 0;
                *status.write().await = ConnectionStatus::Connected;
                if events.send(SessionEvent::Signaling(SignalingEvent::Connected)).is_err() {
                    return;
                }

                let (mut write, mut read) = ws_stream.split();
                let mut keepalive = tokio::time::interval(PING_INTERVAL);
                keepalive.reset();

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if !forward_server_message(&events, text.as_str()) {
                                        return;
                                    }
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    if let Err(e) = write.send(Message::Pong(data)).await {
                                        warn!("Failed to send pong: {}", e);
                                    }
                                }
                                Some(Ok(Message::Close(_))) => {
                                    info!("Server closed connection");
                                    break;
                                }
                                Some(Err(e)) => {
                                    error!("WebSocket error: {}", e);
                                    break;
                                }
                                None => {
                                    info!("WebSocket stream ended");
                                    break;
                                }
                                Some(Ok(_)) => {}
                            }
                        }

                        event = event_rx.recv() => {
                            let Some(ev) = event else {
                                info!("Event channel closed");
                                let _ = write.send(Message::Close(None)).await;
                                *status.write().await = ConnectionStatus::Disconnected;
                                return;
                            };
                            match ev.to_json() {
                                Ok(json) => {
                                    trace!("Sending: {}", json);
                                    if let Err(e) = write.send(Message::Text(json.into())).await {
                                        error!("Failed to send message: {}", e);
                                        break;
                                    }
                                }
                                Err(e) => error!("Failed to encode event: {}", e),
                            }
                        }

                        _ = keepalive.tick() => {
                            if let Ok(json) = ClientEvent::Ping.to_json() {
                                if let Err(e) = write.send(Message::Text(json.into())).await {
                                    error!("Failed to send ping: {}", e);
                                    break;
                                }
                            }
                        }

                        _ = shutdown_rx.recv() => {
                            info!("Shutdown received during connection");
                            let _ = write.send(Message::Close(None)).await;
                            *status.write().await = ConnectionStatus::Disconnected;
                            let _ = events.send(SessionEvent::Signaling(SignalingEvent::Disconnected));
                            return;
                        }
                    }
                }

                let _ = events.send(SessionEvent::Signaling(SignalingEvent::Disconnected));
            }
            Err(e) => {
                error!("Failed to connect: {}", e);
            }
        }

        // Offers and candidates queued for the lost connection are void.
        let mut dropped = 0usize;
        while event_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded queued events for lost connection");
        }

        *status.write().await = ConnectionStatus::Disconnected;

        attempt += 1;
        let backoff = std::cmp::min(Duration::from_secs(2u64.pow(attempt.min(5))), max_backoff);
        info!("Reconnecting in {:?} (attempt {})", backoff, attempt);

        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.recv() => {
                info!("Shutdown during reconnect backoff");
                return;
            }
        }
    }
}

/// Decode a server frame and hand it to the session. Returns false once the
/// session is gone.
fn forward_server_message(events: &EventSender, text: &str) -> bool {
    match ServerEvent::from_json(text) {
        Ok(event) => {
            debug!("Received: {:?}", event);
            events
                .send(SessionEvent::Signaling(SignalingEvent::Server(event)))
                .is_ok()
        }
        Err(e) => {
            warn!("Failed to parse server message: {} - {}", e, text);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::unbounded_channel;

    /// Accept one WebSocket, send `frames`, then echo what the client sends.
    async fn one_shot_server(frames: Vec<String>) -> (Url, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = seen_tx.send(text.as_str().to_string());
                }
            }
        });

        (Url::parse(&format!("ws://{addr}/ws")).unwrap(), seen_rx)
    }

    #[tokio::test]
    async fn forwards_server_events_and_sends_client_events() {
        let session_id = uuid::Uuid::new_v4();
        let connection_id = uuid::Uuid::new_v4();
        let ready = ServerEvent::Ready {
            session_id,
            connection_id,
        }
        .to_json()
        .unwrap();
        let (url, mut seen) = one_shot_server(vec!["garbage".into(), ready]).await;

        let (tx, mut rx) = unbounded_channel();
        let mut client = SignalingClient::connect(url, tx);

        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Signaling(SignalingEvent::Connected))
        ));
        match rx.recv().await {
            Some(SessionEvent::Signaling(SignalingEvent::Server(ServerEvent::Ready {
                connection_id: id,
                ..
            }))) => assert_eq!(id, connection_id),
            other => panic!("Expected ready, got {other:?}"),
        }
        assert_eq!(client.status().await, ConnectionStatus::Connected);

        client.sender().send(ClientEvent::LeaveVoice).await.unwrap();
        let frame = seen.recv().await.unwrap();
        assert_eq!(ClientEvent::from_json(&frame).unwrap(), ClientEvent::LeaveVoice);

        client.disconnect().await;
    }
}

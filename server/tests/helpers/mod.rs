//! Reusable test helpers for signaling integration tests.
//!
//! Use [`spawn_test_server()`] to run the full router on an ephemeral port and
//! [`WsClient`] to drive it over a real WebSocket.
#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;
use uuid::Uuid;

use voxmesh_common::protocol::{ClientEvent, ServerEvent};
use voxmesh_common::{ConnectionId, ParticipantProfile, SessionId};
use voxmesh_server::api::{create_router, AppState};
use voxmesh_server::config::Config;

/// How long a test waits for an expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running test server.
pub struct TestServer {
    pub ws_url: String,
    pub state: AppState,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Build state and router with test configuration.
pub fn test_app() -> (AppState, Router) {
    let state = AppState::new(Config::default_for_test());
    let router = create_router(state.clone());
    (state, router)
}

/// Spawn the full router on an ephemeral port.
pub async fn spawn_test_server() -> TestServer {
    let (state, router) = test_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server failed");
    });

    TestServer {
        ws_url: format!("ws://{addr}/ws"),
        state,
        handle,
    }
}

/// Send a request through the router without a listener.
pub async fn oneshot(router: &Router, request: Request<Body>) -> Response<Body> {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("oneshot request failed")
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

/// A signaling client connected to a [`TestServer`].
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub name: String,
}

impl WsClient {
    /// Connect and consume the `ready` event.
    pub async fn connect(server: &TestServer, name: &str) -> Self {
        let (stream, _) = connect_async(server.ws_url.as_str())
            .await
            .expect("WebSocket connect failed");
        let mut client = Self {
            stream,
            session_id: Uuid::nil(),
            connection_id: Uuid::nil(),
            name: name.to_string(),
        };

        match client.recv().await {
            ServerEvent::Ready {
                session_id,
                connection_id,
            } => {
                client.session_id = session_id;
                client.connection_id = connection_id;
            }
            other => panic!("Expected ready, got {other:?}"),
        }
        client
    }

    pub async fn send(&mut self, event: &ClientEvent) {
        let json = event.to_json().expect("Failed to encode event");
        self.stream
            .send(Message::text(json))
            .await
            .expect("WebSocket send failed");
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::text(text))
            .await
            .expect("WebSocket send failed");
    }

    /// Next server event, panicking after [`EVENT_TIMEOUT`].
    pub async fn recv(&mut self) -> ServerEvent {
        loop {
            let msg = tokio::time::timeout(EVENT_TIMEOUT, self.stream.next())
                .await
                .unwrap_or_else(|_| panic!("{}: timed out waiting for event", self.name))
                .expect("WebSocket stream ended")
                .expect("WebSocket error");

            if let Message::Text(text) = msg {
                return ServerEvent::from_json(text.as_str()).expect("Bad server event");
            }
        }
    }

    /// Assert that no event arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(Ok(Message::Text(text)))) =
            tokio::time::timeout(wait, self.stream.next()).await
        {
            panic!("{}: unexpected event {text}", self.name);
        }
    }

    pub async fn join(&mut self, room_id: &str) {
        let event = ClientEvent::JoinVoice {
            room_id: room_id.to_string(),
            participant: ParticipantProfile {
                id: Uuid::new_v4(),
                display_name: self.name.clone(),
                avatar_url: None,
            },
            connection_id: self.connection_id,
            muted: false,
            deafened: false,
        };
        self.send(&event).await;
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Display names of a roster event, in roster order.
pub fn roster_names(event: &ServerEvent) -> Vec<String> {
    match event {
        ServerEvent::RosterUpdate { participants, .. } => participants
            .iter()
            .map(|p| p.profile.display_name.clone())
            .collect(),
        other => panic!("Expected roster-update, got {other:?}"),
    }
}

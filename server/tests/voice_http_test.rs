//! HTTP surface tests via `tower::ServiceExt::oneshot`.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::mpsc;
use uuid::Uuid;

use helpers::{body_json, oneshot, test_app};
use voxmesh_common::ParticipantProfile;
use voxmesh_server::voice::JoinRequest;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request")
}

#[tokio::test]
async fn test_health() {
    let (_state, router) = test_app();

    let resp = oneshot(&router, get("/health")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["rooms"], 0);
}

#[tokio::test]
async fn test_ice_servers_without_turn() {
    let (_state, router) = test_app();

    let resp = oneshot(&router, get("/api/voice/ice-servers")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    let servers = body["ice_servers"].as_array().expect("ice_servers array");
    assert_eq!(servers.len(), 1);
    assert!(servers[0]["urls"][0].as_str().unwrap().starts_with("stun:"));
    assert!(servers[0].get("credential").is_none());
}

#[tokio::test]
async fn test_unknown_room_is_404() {
    let (_state, router) = test_app();

    let resp = oneshot(&router, get("/api/voice/rooms/nowhere")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body = body_json(resp).await;
    assert_eq!(body["code"], "ROOM_NOT_FOUND");
}

#[tokio::test]
async fn test_room_roster_snapshot() {
    let (state, router) = test_app();
    let (tx, _rx) = mpsc::channel(8);
    let connection_id = Uuid::new_v4();

    state
        .registry
        .join(
            Uuid::new_v4(),
            JoinRequest {
                room_id: "lobby".into(),
                participant: ParticipantProfile {
                    id: Uuid::new_v4(),
                    display_name: "Sara".into(),
                    avatar_url: Some("https://example.invalid/a.png".into()),
                },
                connection_id,
                muted: true,
                deafened: false,
            },
            tx,
        )
        .await;

    let resp = oneshot(&router, get("/api/voice/rooms/lobby")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["room_id"], "lobby");
    let participant = &body["participants"][0];
    assert_eq!(participant["display_name"], "Sara");
    assert_eq!(participant["connection_id"], connection_id.to_string());
    assert_eq!(participant["muted"], true);
    assert_eq!(participant["screen_sharing"], false);
}

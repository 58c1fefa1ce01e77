//! Integration tests for the HTTP surface and WebSocket messaging.

mod helpers;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use sockhub_realtime::frame::{AckId, Frame, FrameType};
use sockhub_realtime::message::EventPacket;
use sockhub_realtime::message::serializer::{decode_event, decode_value, encode_event};

fn event(name: &str, data: serde_json::Value, ack: u64) -> Frame {
    let payload = encode_event(&EventPacket::new(name, data)).unwrap();
    Frame::message("/", payload).with_ack(AckId::new(ack))
}

#[tokio::test]
async fn test_health_check() {
    let app = helpers::TestApp::new();

    let response = app.request("GET", "/api/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["status"], "ok");
    assert_eq!(response.body["data"]["connections"], 0);
}

#[tokio::test]
async fn test_health_reports_shutting_down() {
    let app = helpers::TestApp::new();
    app.realtime.shutdown(Duration::from_millis(10)).await.unwrap();

    let response = app.request("GET", "/api/health").await;

    assert_eq!(response.body["data"]["status"], "shutting_down");
}

#[tokio::test]
async fn test_ws_requires_upgrade() {
    let app = helpers::TestApp::new();

    let response = app.request("GET", "/ws").await;

    assert!(
        response.status.is_client_error(),
        "Expected a 4xx, got {}",
        response.status
    );
}

#[tokio::test]
async fn test_ws_handshake_and_greeting() {
    let server = helpers::TestServer::spawn().await;
    let (mut ws, handshake) = server.connect().await;

    assert_eq!(handshake.sid.len(), 32);
    assert!(!handshake.resumed);
    assert_eq!(server.realtime.connection_count(), 1);

    helpers::send(&mut ws, event("messgae", json!("hi"), 7)).await;
    let reply = helpers::recv(&mut ws).await;

    assert_eq!(reply.frame_type, FrameType::Ack);
    assert_eq!(reply.ack_id, AckId::new(7));
    assert_eq!(decode_value(&reply.payload).unwrap(), json!("hi client!"));

    drop(ws);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_connections_listing() {
    let server = helpers::TestServer::spawn().await;
    let (mut ws, handshake) = server.connect().await;

    helpers::send(&mut ws, event("join", json!({ "room": "lobby" }), 1)).await;
    assert_eq!(helpers::recv(&mut ws).await.frame_type, FrameType::Ack);

    let response = server.app().request("GET", "/api/connections").await;

    assert_eq!(response.status, StatusCode::OK);
    let listed = response.body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], handshake.sid.as_str());
    assert_eq!(listed[0]["state"], "connected");
    assert_eq!(listed[0]["rooms"], json!(["lobby"]));

    drop(ws);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_ws_room_broadcast() {
    let server = helpers::TestServer::spawn().await;
    let (mut alice, _) = server.connect().await;
    let (mut bob, _) = server.connect().await;

    for ws in [&mut alice, &mut bob] {
        helpers::send(ws, event("join", json!({ "room": "lobby" }), 1)).await;
        assert_eq!(helpers::recv(ws).await.frame_type, FrameType::Ack);
    }

    helpers::send(&mut alice, event("chat", json!({ "text": "hello" }), 2)).await;

    let ack = helpers::recv(&mut alice).await;
    assert_eq!(ack.frame_type, FrameType::Ack);
    assert_eq!(decode_value(&ack.payload).unwrap(), json!(1));

    let delivered = helpers::recv(&mut bob).await;
    assert_eq!(delivered.frame_type, FrameType::Message);
    let packet = decode_event(&delivered.payload).unwrap();
    assert_eq!(packet.event, "chat");
    assert_eq!(packet.data, json!({ "text": "hello" }));

    drop(alice);
    drop(bob);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let mut server = helpers::TestServer::spawn().await;
    let (mut ws, _) = server.connect().await;

    server.signal_shutdown();

    let frame = tokio::time::timeout(Duration::from_secs(5), helpers::recv(&mut ws))
        .await
        .expect("No DISCONNECT before timeout");
    assert_eq!(frame.frame_type, FrameType::Disconnect);

    drop(ws);
    let realtime = server.realtime.clone();
    server.stop().await.unwrap();
    assert_eq!(realtime.connection_count(), 0);
    assert!(realtime.is_shutting_down());
}

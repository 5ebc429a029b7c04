// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end socket scenarios over a real WebSocket.

use std::sync::Arc;
use std::time::Duration;

use arq_core::{Envelope, EnvelopeType, generate_message_id};
use arq_server::{ArqonBusConfig, Claims, InfraProtocol, SocketBus, issue_hs256_token};
use arq_storage::{MemoryStorageBackend, MessageStorage};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server(configure: impl FnOnce(&mut ArqonBusConfig)) -> (SocketBus, String) {
    let mut config = ArqonBusConfig::local();
    configure(&mut config);

    let storage = MessageStorage::new(Arc::new(MemoryStorageBackend::new(200)));
    let bus = SocketBus::new(config, Some(storage)).expect("bus builds");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_bus = bus.clone();
    tokio::spawn(async move {
        let _ = arq_server::serve(server_bus, listener).await;
    });

    (bus, format!("ws://{addr}/ws"))
}

async fn recv_json(socket: &mut WsStream) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("frame ok");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).expect("json frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn recv_binary_envelope(socket: &mut WsStream) -> Envelope {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("frame ok");
        match message {
            Message::Binary(bytes) => return arq_wire::decode_binary(&bytes).expect("binary frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[tokio::test]
async fn hello_world_fan_out_between_two_connections() {
    let (bus, url) = start_server(|_| {}).await;

    let (mut w1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut w2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let welcome1 = recv_json(&mut w1).await;
    let welcome2 = recv_json(&mut w2).await;
    let c1 = welcome1["payload"]["client_id"].as_str().unwrap().to_string();
    let c2 = welcome2["payload"]["client_id"].as_str().unwrap().to_string();

    for id in [&c1, &c2] {
        bus.core()
            .routing
            .router
            .join_client_to_room_channel(id, "science", "general")
            .await;
    }

    let frame = json!({
        "id": generate_message_id(),
        "type": "message",
        "timestamp": now_iso(),
        "version": "1.0",
        "room": "science",
        "channel": "general",
        "payload": {"content": "Hello World from SDK"},
    });
    w1.send(Message::Text(frame.to_string().into())).await.unwrap();

    let received = recv_json(&mut w2).await;
    assert_eq!(received["type"], "message");
    assert_eq!(received["payload"]["content"], "Hello World from SDK");
}

#[tokio::test]
async fn cron_schedule_delivers_within_deadline() {
    let (bus, url) = start_server(|_| {}).await;

    let (mut w1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut w2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let c1 = recv_json(&mut w1).await["payload"]["client_id"].as_str().unwrap().to_string();
    let c2 = recv_json(&mut w2).await["payload"]["client_id"].as_str().unwrap().to_string();

    for id in [&c1, &c2] {
        bus.core()
            .routing
            .router
            .join_client_to_room_channel(id, "science", "general")
            .await;
    }

    let cmd_id = generate_message_id();
    let schedule = json!({
        "id": cmd_id,
        "type": "command",
        "timestamp": now_iso(),
        "version": "1.0",
        "command": "op.cron.schedule",
        "args": {
            "room": "science",
            "channel": "general",
            "payload": {"content": "cron-hello"},
            "delay_seconds": 0.05,
        },
    });
    w1.send(Message::Text(schedule.to_string().into())).await.unwrap();

    let response = recv_json(&mut w1).await;
    assert_eq!(response["type"], "response");
    assert_eq!(response["request_id"], cmd_id.as_str());
    assert_eq!(response["status"], "success");

    let delivered = recv_json(&mut w2).await;
    assert_eq!(delivered["type"], "message");
    assert_eq!(delivered["payload"]["content"], "cron-hello");
    assert!(
        delivered["metadata"]["cron_job_id"]
            .as_str()
            .unwrap()
            .starts_with("cron_")
    );
}

#[tokio::test]
async fn json_infra_frames_are_refused_when_protobuf_required() {
    let (_bus, url) = start_server(|config| {
        config.infra_protocol = InfraProtocol::Protobuf;
        config.allow_json_infra = false;
    })
    .await;

    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    // Welcome arrives in the infra wire format: binary.
    let welcome = recv_binary_envelope(&mut socket).await;
    assert_eq!(welcome.kind, EnvelopeType::Message);

    let cmd_id = generate_message_id();
    let frame = json!({
        "id": cmd_id,
        "type": "command",
        "timestamp": now_iso(),
        "version": "1.0",
        "command": "status",
        "args": {},
    });
    socket.send(Message::Text(frame.to_string().into())).await.unwrap();

    let refusal = recv_binary_envelope(&mut socket).await;
    assert_eq!(refusal.kind, EnvelopeType::Response);
    assert_eq!(refusal.error_code.as_deref(), Some("INFRA_PROTOCOL_ERROR"));
    assert_eq!(refusal.request_id.as_deref(), Some(cmd_id.as_str()));
}

#[tokio::test]
async fn casil_reload_and_get_over_authenticated_socket() {
    let (_bus, url) = start_server(|config| {
        config.security.enable_authentication = true;
        config.security.jwt_secret = Some("casil-reload-secret".to_string());
        config.casil.enabled = true;
        config.casil.mode = arq_casil::CasilMode::Monitor;
    })
    .await;

    let token = issue_hs256_token(
        &Claims::expiring_in(120).subject("admin").role("admin").tenant("tenant-a"),
        "casil-reload-secret",
    )
    .unwrap();

    let mut request = url.clone().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {token}").parse().unwrap());
    let (mut socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    recv_json(&mut socket).await; // welcome

    let reload_id = generate_message_id();
    let reload = json!({
        "id": reload_id,
        "type": "command",
        "timestamp": now_iso(),
        "version": "1.0",
        "command": "op.casil.reload",
        "args": {"mode": "enforce"},
    });
    socket.send(Message::Text(reload.to_string().into())).await.unwrap();

    let response = recv_json(&mut socket).await;
    assert_eq!(response["request_id"], reload_id.as_str());
    assert_eq!(response["status"], "success");
    assert_eq!(response["payload"]["data"]["mode"], "enforce");

    let get_id = generate_message_id();
    let get = json!({
        "id": get_id,
        "type": "command",
        "timestamp": now_iso(),
        "version": "1.0",
        "command": "op.casil.get",
        "args": {},
    });
    socket.send(Message::Text(get.to_string().into())).await.unwrap();

    let snapshot = recv_json(&mut socket).await;
    assert_eq!(snapshot["request_id"], get_id.as_str());
    assert_eq!(snapshot["payload"]["data"]["mode"], "enforce");
}

#[tokio::test]
async fn invalid_token_closes_the_handshake() {
    let (_bus, url) = start_server(|config| {
        config.security.enable_authentication = true;
        config.security.jwt_secret = Some("real-secret".to_string());
    })
    .await;

    let forged = issue_hs256_token(
        &Claims::expiring_in(120).subject("intruder"),
        "other-secret",
    )
    .unwrap();

    let mut request = url.clone().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {forged}").parse().unwrap());
    assert!(tokio_tungstenite::connect_async(request).await.is_err());
}

#[tokio::test]
async fn malformed_frame_receives_validation_error_and_connection_survives() {
    let (_bus, url) = start_server(|_| {}).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    recv_json(&mut socket).await; // welcome

    let bad = json!({
        "id": "not-a-valid-id",
        "type": "message",
        "timestamp": now_iso(),
        "version": "1.0",
        "room": "science",
        "payload": {"content": "x"},
    });
    socket.send(Message::Text(bad.to_string().into())).await.unwrap();

    let response = recv_json(&mut socket).await;
    assert_eq!(response["type"], "response");
    assert_eq!(response["error_code"], "VALIDATION_ERROR");

    // The connection is still usable afterwards.
    let status_id = generate_message_id();
    let status = json!({
        "id": status_id,
        "type": "command",
        "timestamp": now_iso(),
        "version": "1.0",
        "command": "status",
        "args": {},
    });
    socket.send(Message::Text(status.to_string().into())).await.unwrap();
    let ok = recv_json(&mut socket).await;
    assert_eq!(ok["request_id"], status_id.as_str());
    assert_eq!(ok["status"], "success");
}

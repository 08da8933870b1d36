use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::common::{spawn_test_server, test_collab, test_ws_url};

async fn connect(addr: std::net::SocketAddr, user_id: &str) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let url = format!("{}?userId={}", test_ws_url(addr, "/ws"), user_id);
    let (socket, _response) = connect_async(url).await.expect("websocket handshake should succeed");
    socket
}

async fn send_json(socket: &mut tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>, value: serde_json::Value) {
    socket
        .send(Message::Text(value.to_string()))
        .await
        .expect("send should succeed");
}

async fn recv_json(socket: &mut tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>) -> serde_json::Value {
    loop {
        match socket.next().await.expect("socket closed early").expect("read error") {
            Message::Text(text) => return serde_json::from_str(&text).expect("server sends valid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn join_then_create_shape_acks_and_broadcasts_to_peers() {
    let collab = test_collab().await;
    let addr = spawn_test_server(collab).await;

    let mut alice = connect(addr, "alice").await;
    send_json(
        &mut alice,
        json!({"type": "JOIN_CANVAS", "canvasId": "room-1", "username": "Alice"}),
    )
    .await;
    let joined = recv_json(&mut alice).await;
    assert_eq!(joined["type"], "JOIN_SUCCESS");
    assert_eq!(joined["canvasId"], "room-1");

    let state = recv_json(&mut alice).await;
    assert_eq!(state["type"], "CANVAS_STATE");
    assert_eq!(state["shapes"].as_array().unwrap().len(), 0);

    let mut bob = connect(addr, "bob").await;
    send_json(
        &mut bob,
        json!({"type": "JOIN_CANVAS", "canvasId": "room-1", "username": "Bob"}),
    )
    .await;
    let _bob_joined = recv_json(&mut bob).await;
    let _bob_state = recv_json(&mut bob).await;

    // Alice hears about Bob joining.
    let presence = recv_json(&mut alice).await;
    assert_eq!(presence["type"], "USER_JOINED");
    assert_eq!(presence["userId"], "bob");

    send_json(
        &mut alice,
        json!({
            "type": "SHAPE_EVENT",
            "localEventId": "le-1",
            "eventType": "SHAPE_CREATED",
            "shapeId": "shape-1",
            "payload": {
                "type": "rectangle",
                "properties": {"x": 0.0, "y": 0.0}
            }
        }),
    )
    .await;

    let ack = recv_json(&mut alice).await;
    assert_eq!(ack["type"], "EVENT_ACK");
    assert_eq!(ack["localEventId"], "le-1");
    assert_eq!(ack["stored"], true);

    let broadcast = recv_json(&mut bob).await;
    assert_eq!(broadcast["type"], "SHAPE_EVENT");
    assert_eq!(broadcast["shapeId"], "shape-1");
    assert_eq!(broadcast["userId"], "alice");
}

#[tokio::test]
async fn get_state_returns_current_snapshot() {
    let collab = test_collab().await;
    let addr = spawn_test_server(collab).await;

    let mut alice = connect(addr, "alice").await;
    send_json(
        &mut alice,
        json!({"type": "JOIN_CANVAS", "canvasId": "room-2", "username": "Alice"}),
    )
    .await;
    let _joined = recv_json(&mut alice).await;
    let _state = recv_json(&mut alice).await;

    send_json(
        &mut alice,
        json!({
            "type": "SHAPE_EVENT",
            "localEventId": "le-2",
            "eventType": "SHAPE_CREATED",
            "shapeId": "shape-2",
            "payload": {
                "type": "circle",
                "properties": {"x": 5.0, "y": 5.0}
            }
        }),
    )
    .await;
    let _ack = recv_json(&mut alice).await;

    send_json(&mut alice, json!({"type": "GET_STATE", "sinceVersion": null})).await;
    let state = recv_json(&mut alice).await;
    assert_eq!(state["type"], "CANVAS_STATE");
    assert_eq!(state["shapes"].as_array().unwrap().len(), 1);
    assert_eq!(state["shapes"][0]["id"], "shape-2");
}

#[tokio::test]
async fn batch_sync_replays_offline_edits_and_reports_result() {
    let collab = test_collab().await;
    let addr = spawn_test_server(collab).await;

    let mut alice = connect(addr, "alice").await;
    send_json(
        &mut alice,
        json!({"type": "JOIN_CANVAS", "canvasId": "room-3", "username": "Alice"}),
    )
    .await;
    let _joined = recv_json(&mut alice).await;
    let _state = recv_json(&mut alice).await;

    send_json(
        &mut alice,
        json!({
            "type": "BATCH_SYNC",
            "lastKnownVersion": 0,
            "events": [{
                "localEventId": "offline-1",
                "eventType": "SHAPE_CREATED",
                "shapeId": "shape-3",
                "payload": {
                    "type": "rectangle",
                    "properties": {"x": 1.0, "y": 1.0}
                },
                "timestamp": 0
            }]
        }),
    )
    .await;

    let result = recv_json(&mut alice).await;
    assert_eq!(result["type"], "BATCH_SYNC_RESULT");
    assert_eq!(result["success"], true);
    assert_eq!(result["storedEvents"].as_array().unwrap().len(), 1);
    assert_eq!(result["storedEvents"][0]["shape_id"], "shape-3");
    assert_eq!(result["storedEvents"][0]["kind"], "SHAPE_CREATED");
    assert_eq!(result["currentState"]["shapes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unrecognized_message_type_reports_an_error_without_closing_the_socket() {
    let collab = test_collab().await;
    let addr = spawn_test_server(collab).await;

    let mut alice = connect(addr, "alice").await;
    send_json(&mut alice, json!({"type": "NOT_A_REAL_MESSAGE"})).await;

    let error = recv_json(&mut alice).await;
    assert_eq!(error["type"], "ERROR");
    assert!(error["error"].as_str().unwrap().contains("NOT_A_REAL_MESSAGE"));

    // the connection is still alive afterwards
    send_json(
        &mut alice,
        json!({"type": "JOIN_CANVAS", "canvasId": "room-4", "username": "Alice"}),
    )
    .await;
    let joined = recv_json(&mut alice).await;
    assert_eq!(joined["type"], "JOIN_SUCCESS");
}

#[tokio::test]
async fn shape_event_without_a_join_is_rejected() {
    let collab = test_collab().await;
    let addr = spawn_test_server(collab).await;

    let mut alice = connect(addr, "alice").await;
    send_json(
        &mut alice,
        json!({
            "type": "SHAPE_EVENT",
            "eventType": "SHAPE_MOVED",
            "shapeId": "shape-x",
            "payload": {"position": {"x": 1.0, "y": 1.0}}
        }),
    )
    .await;

    let error = recv_json(&mut alice).await;
    assert_eq!(error["type"], "ERROR");
    assert!(error["error"].as_str().unwrap().contains("SHAPE_EVENT"));
}

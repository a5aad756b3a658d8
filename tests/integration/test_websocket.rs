//! Integration tests for WebSocket sessions.
//!
//! These tests run the full server (controller task, broadcast hub, axum
//! router) on a local port and drive it with real WebSocket clients. The
//! board is replaced by a pair of channels so tests can inject sensor frames
//! and observe actuator commands.

use std::net::TcpListener;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use pergola_controller::{create_router, AppState, BroadcastHub, Config, Controller};
use pergola_hardware::{HardwareCommand, LdrReadings, SensorFrame, ServoPositions};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Readings that put the controller into night mode (lux 100).
const DUSK: LdrReadings = LdrReadings::new(10, 10, 10, 10);

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running server with its board replaced by channels.
struct TestServer {
    addr: String,
    ws_url: String,
    frames: mpsc::Sender<SensorFrame>,
    board: mpsc::Receiver<HardwareCommand>,
}

/// Spawns the controller and the HTTP server.
///
/// The periodic broadcast is effectively disabled so that every message a
/// client sees is either a direct reply or an event-driven broadcast.
async fn spawn_test_server() -> TestServer {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let ws_url = format!("ws://{addr}/ws");

    let config = Config {
        broadcast_interval_ms: 3_600_000,
        location: None,
        ..Config::default()
    };

    let hub = BroadcastHub::new();
    let (board_tx, board) = mpsc::channel(64);
    let (frames, frames_rx) = mpsc::channel(16);
    let (controller, handle) = Controller::from_config(&config, hub.clone(), board_tx);
    tokio::spawn(controller.run(frames_rx));

    let router = create_router(AppState::new(handle, hub));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        ws_url,
        frames,
        board,
    }
}

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Connects a client and consumes its initial snapshot.
async fn connect_ready(url: &str) -> WsClient {
    let mut client = connect_client(url).await;
    let snapshot = receive_json(&mut client).await;
    assert_eq!(snapshot["status"], "connected");
    client
}

/// Receives the next text message and parses it as JSON.
/// Automatically handles ping frames by responding with pong.
async fn receive_json(client: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse message");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Asserts that no text message arrives within a short window.
async fn assert_silent(client: &mut WsClient) {
    let result = timeout(Duration::from_millis(300), client.next()).await;
    if let Ok(Some(Ok(Message::Text(text)))) = result {
        panic!("Expected no message, got: {text}");
    }
}

/// Sends a JSON command.
async fn send_command(client: &mut WsClient, command: Value) {
    client
        .send(Message::Text(command.to_string()))
        .await
        .expect("Failed to send command");
}

/// Waits for the board to receive `expected`, skipping other commands.
async fn expect_board_command(server: &mut TestServer, expected: HardwareCommand) {
    timeout(Duration::from_secs(5), async {
        while let Some(command) = server.board.recv().await {
            if command == expected {
                return;
            }
        }
        panic!("Board channel closed before {expected:?}");
    })
    .await
    .expect("Timeout waiting for board command");
}

// ============================================================================
// Connection Tests
// ============================================================================

/// Tests that a client receives the current snapshot on connection.
#[tokio::test]
async fn test_client_receives_snapshot_on_connect() {
    let server = spawn_test_server().await;

    let mut client = connect_client(&server.ws_url).await;
    let snapshot = receive_json(&mut client).await;

    assert_eq!(snapshot["status"], "connected");
    assert_eq!(snapshot["mode"], "auto");
    assert_eq!(snapshot["night_mode"]["active"], false);
    assert_eq!(snapshot["data"]["servoPositions"], json!([90, 90, 90, 90]));
    assert!(snapshot["timestamp"].is_string());
}

/// Tests that the session endpoint is also served on the root path.
#[tokio::test]
async fn test_root_path_serves_sessions() {
    let server = spawn_test_server().await;

    let mut client = connect_client(&format!("ws://{}/", server.addr)).await;
    let snapshot = receive_json(&mut client).await;

    assert_eq!(snapshot["status"], "connected");
}

/// Tests that the status endpoint returns the same snapshot shape.
#[tokio::test]
async fn test_status_endpoint_returns_snapshot() {
    let server = spawn_test_server().await;

    let response = reqwest::get(format!("http://{}/api/status", server.addr))
        .await
        .expect("Failed to send HTTP request");
    assert!(response.status().is_success());

    let snapshot: Value = response.json().await.expect("Failed to parse body");
    assert_eq!(snapshot["status"], "connected");
    assert_eq!(snapshot["mode"], "auto");
}

// ============================================================================
// Direct Reply Tests
// ============================================================================

/// Tests that query replies go only to the requesting session.
#[tokio::test]
async fn test_query_reply_goes_only_to_requester() {
    let server = spawn_test_server().await;
    let mut requester = connect_ready(&server.ws_url).await;
    let mut bystander = connect_ready(&server.ws_url).await;

    for cmd in ["GET_STATUS", "GET_STATE", "GET_MODE", "GET_DASHBOARD_DATA"] {
        send_command(&mut requester, json!({ "cmd": cmd })).await;
        let reply = receive_json(&mut requester).await;
        assert_eq!(reply["status"], "connected", "{cmd}");
        assert_eq!(reply["mode"], "auto", "{cmd}");
    }

    assert_silent(&mut bystander).await;
}

/// Tests that an unknown command gets an error reply and the session stays open.
#[tokio::test]
async fn test_unknown_command_keeps_session_open() {
    let server = spawn_test_server().await;
    let mut client = connect_ready(&server.ws_url).await;

    send_command(&mut client, json!({ "cmd": "DANCE" })).await;
    let reply = receive_json(&mut client).await;
    assert_eq!(reply["status"], "error");
    assert!(reply["message"].as_str().unwrap_or_default().contains("DANCE"));

    send_command(&mut client, json!({ "cmd": "GET_MODE" })).await;
    let reply = receive_json(&mut client).await;
    assert_eq!(reply["mode"], "auto");
}

/// Tests protocol errors for malformed messages.
#[tokio::test]
async fn test_malformed_messages_get_error_replies() {
    let server = spawn_test_server().await;
    let mut client = connect_ready(&server.ws_url).await;

    client
        .send(Message::Text("not json".to_string()))
        .await
        .expect("Failed to send");
    assert_eq!(receive_json(&mut client).await["status"], "error");

    send_command(&mut client, json!({ "mode": "manual" })).await;
    assert_eq!(receive_json(&mut client).await["status"], "error");

    send_command(&mut client, json!({ "cmd": "MODE", "mode": "sleep" })).await;
    assert_eq!(receive_json(&mut client).await["status"], "error");

    send_command(&mut client, json!({ "cmd": "SET_ANGLES", "horiz": 10 })).await;
    assert_eq!(receive_json(&mut client).await["status"], "error");

    client
        .send(Message::Binary(vec![1, 2, 3]))
        .await
        .expect("Failed to send");
    assert_eq!(receive_json(&mut client).await["status"], "error");
}

/// Tests that SET_ANGLES outside manual mode is rejected.
#[tokio::test]
async fn test_set_angles_rejected_outside_manual() {
    let server = spawn_test_server().await;
    let mut client = connect_ready(&server.ws_url).await;

    send_command(
        &mut client,
        json!({ "cmd": "SET_ANGLES", "horiz": 10.0, "vert": 5.0 }),
    )
    .await;
    let reply = receive_json(&mut client).await;

    assert_eq!(reply["status"], "rejected");
    assert_eq!(reply["command"], "SET_ANGLES");
    assert!(reply["reason"]
        .as_str()
        .unwrap_or_default()
        .contains("manual mode"));
}

// ============================================================================
// Broadcast Tests
// ============================================================================

/// Tests that a mode change reaches every session, including the sender.
#[tokio::test]
async fn test_mode_change_broadcast_to_all_clients() {
    let mut server = spawn_test_server().await;
    let mut client1 = connect_ready(&server.ws_url).await;
    let mut client2 = connect_ready(&server.ws_url).await;

    send_command(&mut client1, json!({ "cmd": "MODE", "mode": "manual" })).await;

    let update1 = receive_json(&mut client1).await;
    let update2 = receive_json(&mut client2).await;
    assert_eq!(update1["mode"], "manual");
    assert_eq!(update2["mode"], "manual");

    expect_board_command(
        &mut server,
        HardwareCommand::SetRuntimeMode(pergola_hardware::RuntimeMode::Manual),
    )
    .await;
}

/// Tests that manual angles are broadcast and reach the board.
#[tokio::test]
async fn test_set_angles_in_manual_reaches_board() {
    let mut server = spawn_test_server().await;
    let mut client = connect_ready(&server.ws_url).await;

    send_command(&mut client, json!({ "cmd": "MODE", "mode": "manual" })).await;
    receive_json(&mut client).await;

    send_command(
        &mut client,
        json!({ "cmd": "SET_ANGLES", "horiz": -7.8125, "vert": 7.8125 }),
    )
    .await;
    let update = receive_json(&mut client).await;

    assert_eq!(update["data"]["horizontalAngle"], -7.8125);
    assert_eq!(update["data"]["verticalAngle"], 7.8125);
    assert_eq!(update["data"]["servoPositions"], json!([72, 72, 107, 107]));

    expect_board_command(
        &mut server,
        HardwareCommand::SetActuators(ServoPositions::new(72, 72, 107, 107)),
    )
    .await;
}

/// Tests that out-of-range angles are clamped.
#[tokio::test]
async fn test_set_angles_clamped() {
    let server = spawn_test_server().await;
    let mut client = connect_ready(&server.ws_url).await;

    send_command(&mut client, json!({ "cmd": "MODE", "mode": "manual" })).await;
    receive_json(&mut client).await;

    send_command(
        &mut client,
        json!({ "cmd": "SET_ANGLES", "horiz": 55, "vert": -47.5 }),
    )
    .await;
    let update = receive_json(&mut client).await;

    assert_eq!(update["data"]["horizontalAngle"], 40.0);
    assert_eq!(update["data"]["verticalAngle"], -40.0);
    assert_eq!(update["data"]["servoPositions"], json!([180, 180, 0, 0]));
}

/// Tests that broadcasts keep flowing after a client disconnects.
#[tokio::test]
async fn test_broadcast_survives_disconnected_client() {
    let server = spawn_test_server().await;
    let mut client1 = connect_ready(&server.ws_url).await;
    let mut client2 = connect_ready(&server.ws_url).await;
    let mut client3 = connect_ready(&server.ws_url).await;

    client2.close(None).await.ok();
    drop(client2);

    // Give server time to process disconnect
    tokio::time::sleep(Duration::from_millis(50)).await;

    send_command(&mut client1, json!({ "cmd": "MODE", "mode": "off" })).await;

    assert_eq!(receive_json(&mut client1).await["mode"], "off");
    assert_eq!(receive_json(&mut client3).await["mode"], "off");

    // A new session still works afterwards
    let mut client4 = connect_client(&server.ws_url).await;
    assert_eq!(receive_json(&mut client4).await["mode"], "off");
}

// ============================================================================
// Night Mode Tests
// ============================================================================

/// Tests that night mode is broadcast and blocks manual angles.
#[tokio::test]
async fn test_night_mode_from_sensor_frames() {
    let mut server = spawn_test_server().await;
    let mut client = connect_ready(&server.ws_url).await;

    send_command(&mut client, json!({ "cmd": "MODE", "mode": "manual" })).await;
    receive_json(&mut client).await;
    send_command(
        &mut client,
        json!({ "cmd": "SET_ANGLES", "horiz": 20, "vert": -10 }),
    )
    .await;
    receive_json(&mut client).await;
    expect_board_command(
        &mut server,
        HardwareCommand::SetActuators(ServoPositions::new(112, 135, 67, 45)),
    )
    .await;

    server
        .frames
        .send(SensorFrame {
            ldr: Some(DUSK),
            servo_feedback: None,
        })
        .await
        .expect("Failed to send frame");

    let update = receive_json(&mut client).await;
    assert_eq!(update["night_mode"]["active"], true);
    assert_eq!(update["mode"], "manual");
    assert_eq!(update["data"]["horizontalAngle"], 0.0);
    assert_eq!(update["data"]["lightSensorReading"], 100);

    expect_board_command(&mut server, HardwareCommand::SetActuators(ServoPositions::FLAT)).await;

    send_command(
        &mut client,
        json!({ "cmd": "SET_ANGLES", "horiz": 5, "vert": 5 }),
    )
    .await;
    let reply = receive_json(&mut client).await;
    assert_eq!(reply["status"], "rejected");
    assert_eq!(reply["reason"], "Night mode is active");
}

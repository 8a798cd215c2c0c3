//! Integration tests for the WebSocket event stream.
//!
//! These tests validate connection handling, client commands, per-session
//! filtering and the busy signal over a live socket.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use learnsor_session::{
    create_router, AppState, ControllerOptions, DisclosureController, DisclosureEvent,
    LevelRegistry, ManualClock, SessionContext,
};
use learnsor_worker::ScriptedWorker;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the test server and returns the WebSocket URL and the controller.
async fn spawn_test_server(worker: Arc<ScriptedWorker>) -> (String, Arc<DisclosureController>) {
    let options = ControllerOptions {
        dwell: Duration::from_secs(60),
        worker_deadline: Duration::from_secs(5),
        ..Default::default()
    };
    let controller = Arc::new(
        DisclosureController::new(LevelRegistry::default(), worker, options)
            .with_clock(Arc::new(ManualClock::default())),
    );
    let router = create_router(AppState::with_controller(Arc::clone(&controller)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    (format!("ws://{addr}/ws"), controller)
}

/// Connects a WebSocket client and consumes its `connected` event.
async fn connect_client(url: &str) -> WsClient {
    let (mut ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    let event = receive_event(&mut ws_stream).await;
    assert!(
        matches!(event, DisclosureEvent::Connected(_)),
        "Expected Connected event, got: {event:?}"
    );
    ws_stream
}

/// Receives the next text message from the WebSocket and parses it as an event.
/// Automatically handles ping frames by responding with pong.
async fn receive_event(client: &mut WsClient) -> DisclosureEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
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

/// Sends a JSON command as a text frame.
async fn send_command(client: &mut WsClient, command: serde_json::Value) {
    client
        .send(Message::Text(command.to_string()))
        .await
        .expect("Failed to send command");
}

fn context() -> SessionContext {
    SessionContext::new("total = sum(prices)", "Why not a for loop?")
}

// ============================================================================
// Connection Tests
// ============================================================================

/// Tests that a client receives the level list on connection.
#[tokio::test]
async fn test_connected_event_lists_levels() {
    let (ws_url, _) = spawn_test_server(Arc::new(ScriptedWorker::new())).await;

    let (mut client, _) = connect_async(&ws_url).await.expect("Failed to connect");
    let event = receive_event(&mut client).await;

    let DisclosureEvent::Connected(payload) = event else {
        panic!("Expected Connected event, got: {event:?}");
    };
    let ids: Vec<_> = payload.levels.iter().map(|level| level.id.as_str()).collect();
    assert_eq!(ids, ["concept", "how", "code"]);
    assert_eq!(payload.dwell_secs, 60);
    assert!(!payload.busy);
}

// ============================================================================
// Command Tests
// ============================================================================

/// Tests opening a session and requesting a level over the socket.
#[tokio::test]
async fn test_open_session_and_request_level() {
    let (ws_url, _) = spawn_test_server(Arc::new(ScriptedWorker::new())).await;
    let mut client = connect_client(&ws_url).await;

    send_command(
        &mut client,
        json!({
            "command": "open_session",
            "sessionId": "ws-1",
            "code": "total = sum(prices)",
            "question": "Why not a for loop?"
        }),
    )
    .await;
    let DisclosureEvent::SessionOpened(snapshot) = receive_event(&mut client).await else {
        panic!("Expected SessionOpened event");
    };
    assert_eq!(snapshot.session_id, "ws-1");
    assert_eq!(snapshot.current_level, "concept");

    // The socket is now bound to ws-1, so no sessionId is needed.
    send_command(&mut client, json!({"command": "request_level", "level": "concept"})).await;

    let DisclosureEvent::Loading(loading) = receive_event(&mut client).await else {
        panic!("Expected Loading event");
    };
    assert_eq!(loading.level, "concept");
    assert!(!loading.follow_up);

    let DisclosureEvent::Response(response) = receive_event(&mut client).await else {
        panic!("Expected Response event");
    };
    assert_eq!(response.session_id, "ws-1");
    assert_eq!(response.text, "Hint for concept: Why not a for loop?");
    assert!(response.can_proceed);

    let event = receive_event(&mut client).await;
    assert!(matches!(event, DisclosureEvent::LevelCompleted(ref p) if p.level == "concept"));
}

/// Tests that locked levels come back as error events.
#[tokio::test]
async fn test_locked_level_reports_error_event() {
    let worker = Arc::new(ScriptedWorker::new());
    let (ws_url, controller) = spawn_test_server(worker.clone()).await;
    controller.open_session("ws-2", context()).await;

    let mut client = connect_client(&format!("{ws_url}?session=ws-2")).await;
    send_command(&mut client, json!({"command": "request_level", "level": "how"})).await;

    let DisclosureEvent::Error(error) = receive_event(&mut client).await else {
        panic!("Expected Error event");
    };
    assert_eq!(error.kind, "OUT_OF_ORDER");
    assert_eq!(error.session_id.as_deref(), Some("ws-2"));
    assert_eq!(worker.call_count(), 0);
}

/// Tests that malformed commands are answered with an error.
#[tokio::test]
async fn test_bad_commands_answered_with_error() {
    let (ws_url, _) = spawn_test_server(Arc::new(ScriptedWorker::new())).await;
    let mut client = connect_client(&ws_url).await;

    client
        .send(Message::Text("not json".to_string()))
        .await
        .expect("Failed to send");
    let DisclosureEvent::Error(error) = receive_event(&mut client).await else {
        panic!("Expected Error event");
    };
    assert_eq!(error.kind, "BAD_COMMAND");

    // No session bound and none given.
    send_command(&mut client, json!({"command": "request_level", "level": "concept"})).await;
    let DisclosureEvent::Error(error) = receive_event(&mut client).await else {
        panic!("Expected Error event");
    };
    assert_eq!(error.kind, "BAD_COMMAND");
    assert!(error.message.contains("open_session"));
}

// ============================================================================
// Filtering and admission
// ============================================================================

/// Tests that a client following one session never sees another's events.
#[tokio::test]
async fn test_session_filter() {
    let (ws_url, controller) = spawn_test_server(Arc::new(ScriptedWorker::new())).await;
    controller.open_session("mine", context()).await;
    controller.open_session("theirs", context()).await;

    let mut client = connect_client(&format!("{ws_url}?session=mine")).await;

    controller
        .request_level("theirs", "concept")
        .await
        .expect("theirs should be served");
    controller
        .request_level("mine", "concept")
        .await
        .expect("mine should be served");

    let DisclosureEvent::Loading(loading) = receive_event(&mut client).await else {
        panic!("Expected Loading event");
    };
    assert_eq!(loading.session_id, "mine");
}

/// Tests that a second command while the worker runs yields a busy error.
#[tokio::test]
async fn test_busy_while_worker_runs() {
    let worker = Arc::new(ScriptedWorker::new().held());
    let (ws_url, controller) = spawn_test_server(worker.clone()).await;
    controller.open_session("busy", context()).await;

    let mut client = connect_client(&format!("{ws_url}?session=busy")).await;
    send_command(&mut client, json!({"command": "request_level", "level": "concept"})).await;
    assert!(matches!(
        receive_event(&mut client).await,
        DisclosureEvent::Loading(_)
    ));
    worker.wait_until_invoked().await;

    send_command(
        &mut client,
        json!({"command": "ask_follow_up", "question": "And with generators?"}),
    )
    .await;
    let DisclosureEvent::Error(error) = receive_event(&mut client).await else {
        panic!("Expected Error event");
    };
    assert_eq!(error.kind, "BUSY");

    worker.release();
    assert!(matches!(
        receive_event(&mut client).await,
        DisclosureEvent::Response(_)
    ));
    assert_eq!(worker.call_count(), 1);
}

/// Tests that events reach every connected client.
#[tokio::test]
async fn test_events_broadcast_to_all_clients() {
    let (ws_url, controller) = spawn_test_server(Arc::new(ScriptedWorker::new())).await;
    controller.open_session("shared", context()).await;

    let mut client1 = connect_client(&ws_url).await;
    let mut client2 = connect_client(&format!("{ws_url}?session=shared")).await;

    controller
        .ask_follow_up("shared", "Is sum() faster?")
        .await
        .expect("follow-up should be answered");

    for client in [&mut client1, &mut client2] {
        let DisclosureEvent::Loading(loading) = receive_event(client).await else {
            panic!("Expected Loading event");
        };
        assert!(loading.follow_up);
        let DisclosureEvent::FollowUpResponse(answer) = receive_event(client).await else {
            panic!("Expected FollowUpResponse event");
        };
        assert_eq!(answer.question, "Is sum() faster?");
    }
}

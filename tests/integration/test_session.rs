//! Integration tests for the HTTP session API.
//!
//! These tests run the full router on a real socket and drive it with
//! `reqwest`, covering the level walkthrough, admission, follow-ups and
//! the process-backed worker.

use std::sync::Arc;
use std::time::Duration;

use learnsor_session::{
    create_router, AppState, ControllerOptions, DisclosureController, LevelRegistry, ManualClock,
};
use learnsor_worker::{ScriptedWorker, Worker};
use reqwest::StatusCode;
use serde_json::{json, Value};

/// Test server handle.
struct TestServer {
    base_url: String,
    client: reqwest::Client,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn post(&self, path: &str, body: Option<Value>) -> reqwest::Response {
        let request = self.client.post(format!("{}{path}", self.base_url));
        let request = match body {
            Some(body) => request.json(&body),
            None => request,
        };
        request.send().await.expect("Request failed")
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .expect("Request failed")
    }

    async fn open_session(&self, id: &str) {
        let response = self
            .post(
                "/api/sessions",
                Some(json!({
                    "sessionId": id,
                    "code": "words = line.split()\ncounts = Counter(words)",
                    "question": "How do I count words?",
                    "filename": "count.py"
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

/// Spawns a server around `worker` with a one minute dwell time.
async fn spawn_test_server(
    worker: Arc<dyn Worker>,
    clock: Arc<ManualClock>,
    deadline: Duration,
) -> (TestServer, Arc<DisclosureController>) {
    let options = ControllerOptions {
        dwell: Duration::from_secs(60),
        worker_deadline: deadline,
        ..Default::default()
    };
    let controller = Arc::new(
        DisclosureController::new(LevelRegistry::default(), worker, options).with_clock(clock),
    );
    let router = create_router(AppState::with_controller(Arc::clone(&controller)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    let server = TestServer {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        _handle: handle,
    };
    (server, controller)
}

async fn body(response: reqwest::Response) -> Value {
    response.json().await.expect("Failed to parse body")
}

// ============================================================================
// Walkthrough
// ============================================================================

/// Tests the full concept -> how -> code progression with dwell gating.
#[tokio::test]
async fn test_level_walkthrough() {
    let worker = Arc::new(ScriptedWorker::new());
    let clock = Arc::new(ManualClock::default());
    let (server, _) = spawn_test_server(worker.clone(), clock.clone(), Duration::from_secs(5)).await;
    server.open_session("walk").await;

    let response = server.post("/api/sessions/walk/levels/concept", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let level = body(response).await;
    assert_eq!(level["level"], "concept");
    assert_eq!(level["canProceed"], true);
    assert_eq!(level["text"], "Hint for concept: How do I count words?");

    let response = server.post("/api/sessions/walk/levels/how", None).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let error = body(response).await;
    assert_eq!(error["kind"], "TOO_SOON");
    assert_eq!(error["remainingSeconds"], 60);

    clock.advance(Duration::from_secs(61));
    let response = server.post("/api/sessions/walk/levels/how", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    clock.advance(Duration::from_secs(61));
    let response = server.post("/api/sessions/walk/levels/code", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let level = body(response).await;
    assert_eq!(level["canProceed"], false);

    let snapshot = body(server.get("/api/sessions/walk").await).await;
    assert_eq!(snapshot["currentLevel"], "code");
    assert_eq!(snapshot["filename"], "count.py");
    assert_eq!(worker.call_count(), 3);
}

/// Tests that skipping ahead is refused without calling the worker.
#[tokio::test]
async fn test_skipping_levels_is_refused() {
    let worker = Arc::new(ScriptedWorker::new());
    let (server, _) = spawn_test_server(
        worker.clone(),
        Arc::new(ManualClock::default()),
        Duration::from_secs(5),
    )
    .await;
    server.open_session("skip").await;

    let response = server.post("/api/sessions/skip/levels/code", None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error = body(response).await;
    assert_eq!(error["kind"], "OUT_OF_ORDER");
    assert!(error["error"]
        .as_str()
        .unwrap_or_default()
        .contains("complete previous levels first"));

    assert_eq!(worker.call_count(), 0);
}

// ============================================================================
// Admission
// ============================================================================

/// Tests that a second request while one is in flight is refused as busy.
#[tokio::test]
async fn test_second_request_while_in_flight_is_busy() {
    let worker = Arc::new(ScriptedWorker::new().held());
    let (server, controller) = spawn_test_server(
        worker.clone(),
        Arc::new(ManualClock::default()),
        Duration::from_secs(5),
    )
    .await;
    server.open_session("a").await;
    server.open_session("b").await;

    let first = {
        let client = server.client.clone();
        let url = format!("{}/api/sessions/a/levels/concept", server.base_url);
        tokio::spawn(async move { client.post(url).send().await })
    };
    worker.wait_until_invoked().await;
    assert!(controller.is_busy());

    let health = body(server.get("/api/health").await).await;
    assert_eq!(health["busy"], true);

    let response = server.post("/api/sessions/b/levels/concept", None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body(response).await["kind"], "BUSY");

    worker.release();
    let response = first
        .await
        .expect("Task panicked")
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!controller.is_busy());

    let response = server.post("/api/sessions/b/levels/concept", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Follow-ups and session lifecycle
// ============================================================================

/// Tests that follow-ups are answered for the current level and recorded.
#[tokio::test]
async fn test_follow_up_recorded_in_snapshot() {
    let worker = Arc::new(ScriptedWorker::new());
    let (server, _) = spawn_test_server(
        worker.clone(),
        Arc::new(ManualClock::default()),
        Duration::from_secs(5),
    )
    .await;
    server.open_session("f").await;

    let response = server
        .post(
            "/api/sessions/f/follow-up",
            Some(json!({"question": "What does Counter return?"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let answer = body(response).await;
    assert_eq!(answer["level"], "concept");

    let snapshot = body(server.get("/api/sessions/f").await).await;
    assert_eq!(snapshot["followUps"].as_array().map(Vec::len), Some(1));
    assert_eq!(snapshot["currentLevelIndex"], 0);
}

/// Tests that a new question resets progress and a closed session is gone.
#[tokio::test]
async fn test_reopen_with_new_question_resets_then_close() {
    let worker = Arc::new(ScriptedWorker::new());
    let (server, _) = spawn_test_server(
        worker,
        Arc::new(ManualClock::default()),
        Duration::from_secs(5),
    )
    .await;
    server.open_session("r").await;
    server.post("/api/sessions/r/levels/concept", None).await;

    let response = server
        .post(
            "/api/sessions",
            Some(json!({"sessionId": "r", "code": "x = 1", "question": "What is x?"})),
        )
        .await;
    let snapshot = body(response).await;
    assert_eq!(snapshot["question"], "What is x?");
    assert!(snapshot["levels"][0]["servedAt"].is_null());

    let response = server
        .client
        .delete(format!("{}/api/sessions/r", server.base_url))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = server.get("/api/sessions/r").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Process worker
// ============================================================================

#[cfg(unix)]
mod process {
    use learnsor_worker::{ProcessWorker, WorkerCommand};

    use super::*;

    fn shell_worker(script: &str) -> Arc<ProcessWorker> {
        Arc::new(ProcessWorker::new(
            WorkerCommand::new("sh").with_args(["-c", script]),
        ))
    }

    /// Tests the full path through a real worker process.
    #[tokio::test]
    async fn test_process_worker_serves_level() {
        let worker = shell_worker(
            r#"cat > /dev/null; printf '{"concept": "  Counting is grouping.  ", "how": "Use Counter."}'"#,
        );
        let (server, _) =
            spawn_test_server(worker, Arc::new(ManualClock::default()), Duration::from_secs(10))
                .await;
        server.open_session("p").await;

        let response = server.post("/api/sessions/p/levels/concept", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await["text"], "Counting is grouping.");
    }

    /// Tests that a crashing worker surfaces its diagnostic and frees the gate.
    #[tokio::test]
    async fn test_process_worker_failure() {
        let worker = shell_worker("cat > /dev/null; echo 'model unavailable' >&2; exit 2");
        let (server, controller) =
            spawn_test_server(worker, Arc::new(ManualClock::default()), Duration::from_secs(10))
                .await;
        server.open_session("p").await;

        let response = server.post("/api/sessions/p/levels/concept", None).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let error = body(response).await;
        assert_eq!(error["kind"], "WORKER_ERROR");
        assert!(error["error"]
            .as_str()
            .unwrap_or_default()
            .contains("model unavailable"));
        assert!(!controller.is_busy());
    }

    /// Tests that a hung worker is cut off at the deadline.
    #[tokio::test]
    async fn test_process_worker_timeout() {
        let worker = shell_worker("sleep 5");
        let (server, controller) = spawn_test_server(
            worker,
            Arc::new(ManualClock::default()),
            Duration::from_millis(300),
        )
        .await;
        server.open_session("p").await;

        let response = server.post("/api/sessions/p/levels/concept", None).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body(response).await["kind"], "TIMEOUT");
        assert!(!controller.is_busy());
    }
}

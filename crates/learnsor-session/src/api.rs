//! HTTP API endpoints for the Learnsor session controller.
//!
//! This module provides the REST API the editor integration uses to open
//! sessions and request levels, plus the `/ws` event stream.
//!
//! # Endpoints
//!
//! - `GET /api/health` - Liveness and admission status
//! - `GET /api/levels` - The level registry
//! - `POST /api/sessions` - Open or rebind a session
//! - `GET /api/sessions/:id` - Session snapshot
//! - `DELETE /api/sessions/:id` - Close a session
//! - `POST /api/sessions/:id/levels/:level_id` - Request a level
//! - `POST /api/sessions/:id/follow-up` - Ask a follow-up question
//! - `GET /ws` - WebSocket event stream
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use learnsor_session::{create_router, AppState, ControllerOptions, DisclosureController, LevelRegistry};
//! use learnsor_worker::ScriptedWorker;
//!
//! # async fn example() {
//! let controller = DisclosureController::new(
//!     LevelRegistry::default(),
//!     Arc::new(ScriptedWorker::new()),
//!     ControllerOptions::default(),
//! );
//!
//! let router = create_router(AppState::new(controller));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::controller::{DisclosureController, FollowUpResponse, LevelResponse};
use crate::error::DisclosureError;
use crate::levels::Level;
use crate::session::{SessionContext, SessionSnapshot};
use crate::websocket::ws_handler;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response body for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Whether a request is in flight.
    pub busy: bool,
    /// Number of open sessions.
    pub sessions: usize,
}

/// Response body for the levels endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelsResponse {
    /// Levels in order.
    pub levels: Vec<Level>,
    /// Minimum dwell time per level, in seconds.
    pub dwell_secs: u64,
}

/// Request body for opening a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    /// Session id; generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// The selected code and question.
    #[serde(flatten)]
    pub context: SessionContext,
}

/// Request body for a follow-up question.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowUpRequest {
    /// The question.
    pub question: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
    /// Stable failure code.
    pub kind: String,
    /// Seconds to wait before retrying, for `TOO_SOON`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The session controller.
    pub controller: Arc<DisclosureController>,
}

impl AppState {
    /// Creates a new `AppState` around a controller.
    #[must_use]
    pub fn new(controller: DisclosureController) -> Self {
        Self {
            controller: Arc::new(controller),
        }
    }

    /// Creates a new `AppState` sharing an existing controller.
    #[must_use]
    pub const fn with_controller(controller: Arc<DisclosureController>) -> Self {
        Self { controller }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The controller refused or failed the request.
    Disclosure(DisclosureError),
    /// The request body is unusable.
    BadRequest(String),
    /// The request task failed to complete.
    Internal(String),
}

impl From<DisclosureError> for ApiError {
    fn from(error: DisclosureError) -> Self {
        Self::Disclosure(error)
    }
}

/// HTTP status for a controller outcome.
const fn status_for(error: &DisclosureError) -> StatusCode {
    use learnsor_worker::WorkerError;

    match error {
        DisclosureError::Busy | DisclosureError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        DisclosureError::NoSession { .. } | DisclosureError::UnknownLevel { .. } => {
            StatusCode::NOT_FOUND
        }
        DisclosureError::OutOfOrder { .. } | DisclosureError::SessionReset => StatusCode::CONFLICT,
        DisclosureError::TooSoon { .. } => StatusCode::TOO_MANY_REQUESTS,
        DisclosureError::Worker(WorkerError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        DisclosureError::Worker(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Disclosure(error) => {
                let status = status_for(&error);
                let body = Json(ErrorResponse {
                    error: error.to_string(),
                    kind: error.kind().to_string(),
                    remaining_seconds: error.remaining_secs(),
                });
                match error.remaining_secs() {
                    Some(secs) => {
                        (status, [(header::RETRY_AFTER, secs.to_string())], body).into_response()
                    }
                    None => (status, body).into_response(),
                }
            }
            Self::BadRequest(message) => {
                let body = Json(ErrorResponse {
                    error: message,
                    kind: "INVALID_REQUEST".to_string(),
                    remaining_seconds: None,
                });
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            Self::Internal(message) => {
                let body = Json(ErrorResponse {
                    error: message,
                    kind: "INTERNAL".to_string(),
                    remaining_seconds: None,
                });
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints and the WebSocket route.
///
/// The router is configured with:
/// - All API routes under `/api`
/// - The event stream at `/ws`
/// - CORS middleware for the editor webview
/// - Tracing middleware for request logging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handle_health))
        .route("/levels", get(handle_levels))
        .route("/sessions", post(handle_open_session))
        .route(
            "/sessions/:id",
            get(handle_snapshot).delete(handle_close_session),
        )
        .route("/sessions/:id/levels/:level_id", post(handle_request_level))
        .route("/sessions/:id/follow-up", post(handle_follow_up));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /api/health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        busy: state.controller.is_busy(),
        sessions: state.controller.session_count().await,
    })
}

/// Handler for `GET /api/levels`.
async fn handle_levels(State(state): State<Arc<AppState>>) -> Json<LevelsResponse> {
    Json(LevelsResponse {
        levels: state.controller.levels().iter().cloned().collect(),
        dwell_secs: state.controller.options().dwell.as_secs(),
    })
}

/// Handler for `POST /api/sessions`.
///
/// Opens a session, or rebinds it when the code or question changed.
async fn handle_open_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenSessionRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    if request.context.code.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Select some code before asking for hints".to_string(),
        ));
    }

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(session = %session_id, "Open session request");

    Ok(Json(
        state
            .controller
            .open_session(&session_id, request.context)
            .await,
    ))
}

/// Handler for `GET /api/sessions/:id`.
async fn handle_snapshot(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.controller.snapshot(&session_id).await?))
}

/// Handler for `DELETE /api/sessions/:id`.
async fn handle_close_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.close_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `POST /api/sessions/:id/levels/:level_id`.
///
/// Waits for the worker; the response arrives when the level is served.
///
/// The controller call runs on its own task, so a client that hangs up does
/// not cancel the worker and the outcome is still recorded and broadcast.
async fn handle_request_level(
    State(state): State<Arc<AppState>>,
    Path((session_id, level_id)): Path<(String, String)>,
) -> Result<Json<LevelResponse>, ApiError> {
    let controller = Arc::clone(&state.controller);
    let task =
        tokio::spawn(async move { controller.request_level(&session_id, &level_id).await });
    Ok(Json(joined(task.await)??))
}

/// Handler for `POST /api/sessions/:id/follow-up`.
///
/// Runs on its own task like [`handle_request_level`].
async fn handle_follow_up(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<FollowUpRequest>,
) -> Result<Json<FollowUpResponse>, ApiError> {
    let question = request.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::BadRequest(
            "Follow-up question must not be empty".to_string(),
        ));
    }
    let controller = Arc::clone(&state.controller);
    let task =
        tokio::spawn(async move { controller.ask_follow_up(&session_id, &question).await });
    Ok(Json(joined(task.await)??))
}

fn joined<T>(result: Result<T, tokio::task::JoinError>) -> Result<T, ApiError> {
    result.map_err(|e| {
        error!(error = %e, "Request task did not complete");
        ApiError::Internal("The request could not be completed".to_string())
    })
}

// ============================================================================
// Tests
// ============================================================================

//! WebSocket transport for controller events and client commands.
//!
//! A client connects to `/ws`, optionally with `?session=<id>` to follow a
//! single session. It immediately receives a `connected` event with the
//! level list, then every matching [`DisclosureEvent`].
//!
//! Clients may also drive the controller by sending JSON text frames:
//!
//! ```json
//! {"command": "open_session", "sessionId": "s1", "code": "x = 1", "question": "Why?"}
//! {"command": "request_level", "level": "concept"}
//! {"command": "ask_follow_up", "question": "What about tuples?"}
//! ```
//!
//! Level requests and follow-ups run on spawned tasks so the socket keeps
//! reading while the worker runs; a second request in the meantime is
//! answered with a `BUSY` error event.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::events::DisclosureEvent;
use crate::session::SessionContext;

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Query parameters accepted on `/ws`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsQuery {
    /// Only forward events for this session.
    pub session: Option<String>,
}

/// A command sent by a WebSocket client.
///
/// `sessionId` may be omitted when the socket is already following a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Open or rebind a session.
    #[serde(rename_all = "camelCase")]
    OpenSession {
        /// Session id; a new one is generated when absent.
        #[serde(default)]
        session_id: Option<String>,
        /// Selected code.
        code: String,
        /// The learner's question.
        question: String,
        /// Originating filename.
        #[serde(default)]
        filename: Option<String>,
        /// Project path.
        #[serde(default)]
        project_path: Option<String>,
    },
    /// Request a level.
    #[serde(rename_all = "camelCase")]
    RequestLevel {
        /// Target session.
        #[serde(default)]
        session_id: Option<String>,
        /// Level id.
        level: String,
    },
    /// Ask a follow-up question.
    #[serde(rename_all = "camelCase")]
    AskFollowUp {
        /// Target session.
        #[serde(default)]
        session_id: Option<String>,
        /// The question.
        question: String,
    },
}

/// WebSocket upgrade handler.
///
/// Called when a client connects to `/ws`. Upgrades the HTTP connection
/// to a WebSocket and spawns a handler task.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(session = ?query.session, "New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.session))
}

/// Handles a single WebSocket connection.
///
/// - Sends `connected` with the level list immediately
/// - Forwards events, filtered to the followed session if there is one
/// - Runs client commands
/// - Sends heartbeat pings every 30 seconds
/// - Closes connection after 3 missed pongs
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, mut session: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let controller = Arc::clone(&state.controller);

    // Subscribe before greeting so nothing emitted in between is lost.
    let mut event_receiver = controller.subscribe();

    let connected = DisclosureEvent::connected(
        controller.levels().iter().cloned().collect(),
        controller.options().dwell.as_secs(),
        controller.is_busy(),
    );
    let Some(connected_json) = to_json(&connected) else {
        return;
    };
    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!(session = ?session, "WebSocket client connected");

    let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_command(&state, &mut session, &text).await;
                        if let Some(json) = reply.as_ref().and_then(to_json) {
                            if sender.send(Message::Text(json)).await.is_err() {
                                debug!("Failed to send reply, client disconnected");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary message from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(event) => {
                        if !follows(session.as_deref(), &event) {
                            continue;
                        }
                        let Some(json) = to_json(&event) else {
                            continue;
                        };
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!(session = ?session, "WebSocket client disconnected");
}

/// Returns `true` if a socket following `session` should see `event`.
fn follows(session: Option<&str>, event: &DisclosureEvent) -> bool {
    match (session, event.session_id()) {
        (Some(followed), Some(id)) => followed == id,
        _ => true,
    }
}

fn to_json(event: &DisclosureEvent) -> Option<String> {
    serde_json::to_string(event)
        .map_err(|e| warn!("Failed to serialize {} event: {}", event.event_name(), e))
        .ok()
}

/// Runs one client command.
///
/// Returns an event to send to this client only. Outcomes of level requests
/// and follow-ups arrive through the broadcaster instead.
async fn handle_command(
    state: &Arc<AppState>,
    session: &mut Option<String>,
    text: &str,
) -> Option<DisclosureEvent> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "Unreadable client command");
            return Some(DisclosureEvent::error_message(
                format!("Unreadable command: {e}"),
                "BAD_COMMAND",
            ));
        }
    };

    match command {
        ClientCommand::OpenSession {
            session_id,
            code,
            question,
            filename,
            project_path,
        } => {
            let id = session_id
                .or_else(|| session.clone())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let context = SessionContext {
                code,
                question,
                filename,
                project_path,
            };
            let snapshot = state.controller.open_session(&id, context).await;
            *session = Some(id);
            Some(DisclosureEvent::session_opened(snapshot))
        }
        ClientCommand::RequestLevel { session_id, level } => {
            let Some(id) = session_id.or_else(|| session.clone()) else {
                return Some(missing_session());
            };
            let controller = Arc::clone(&state.controller);
            tokio::spawn(async move {
                let _ = controller.request_level(&id, &level).await;
            });
            None
        }
        ClientCommand::AskFollowUp {
            session_id,
            question,
        } => {
            let Some(id) = session_id.or_else(|| session.clone()) else {
                return Some(missing_session());
            };
            let question = question.trim().to_string();
            if question.is_empty() {
                return Some(DisclosureEvent::error_message(
                    "Follow-up question must not be empty",
                    "BAD_COMMAND",
                ));
            }
            let controller = Arc::clone(&state.controller);
            tokio::spawn(async move {
                let _ = controller.ask_follow_up(&id, &question).await;
            });
            None
        }
    }
}

fn missing_session() -> DisclosureEvent {
    DisclosureEvent::error_message(
        "No session given. Send open_session first or connect with ?session=<id>.",
        "BAD_COMMAND",
    )
}

//! Outbound events and their broadcaster.
//!
//! The controller reports progress as fire-and-forget notifications. Every
//! event except `connected` names the session it belongs to so that a
//! subscriber can follow a single session.
//!
//! # Event Types
//!
//! - `connected` - Sent to each WebSocket client on connect, with the level list
//! - `loading` - A request was admitted and the worker is running
//! - `response` - A level was served
//! - `follow_up_response` - A follow-up question was answered
//! - `error` - A request was rejected or the worker failed
//! - `level_completed` - Sent after `response`; the next level's countdown starts
//! - `session_reset` - The session was rebound to new code or a new question
//! - `session_opened` - Reply to a WebSocket `open_session` command, with the snapshot
//!
//! # Example
//!
//! ```no_run
//! use learnsor_session::{DisclosureEvent, EventBroadcaster};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(DisclosureEvent::level_completed("session-1", "concept"));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::DisclosureError;
use crate::levels::Level;
use crate::session::SessionSnapshot;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// The level registry in order.
    pub levels: Vec<Level>,
    /// Minimum dwell time per level, in seconds.
    pub dwell_secs: u64,
    /// Whether a request is currently in flight.
    pub busy: bool,
}

/// Payload for the `loading` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingPayload {
    /// Session the request belongs to.
    pub session_id: String,
    /// Level being generated (the current level for follow-ups).
    pub level: String,
    /// Title of that level.
    pub title: String,
    /// Whether this is a follow-up question.
    pub follow_up: bool,
}

/// Payload for the `response` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Session the response belongs to.
    pub session_id: String,
    /// Level that was served.
    pub level: String,
    /// Title of the level.
    pub title: String,
    /// Hint text.
    pub text: String,
    /// Whether a further level exists.
    pub can_proceed: bool,
}

/// Payload for the `follow_up_response` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpPayload {
    /// Session the answer belongs to.
    pub session_id: String,
    /// Level that was current when the question was asked.
    pub level: String,
    /// The follow-up question.
    pub question: String,
    /// The answer.
    pub text: String,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Session the failure belongs to, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Message suitable for the learner.
    pub message: String,
    /// Stable failure code such as `TOO_SOON`.
    pub kind: String,
    /// Seconds to wait, for `TOO_SOON`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
}

/// Payload for the `level_completed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCompletedPayload {
    /// Session that completed the level.
    pub session_id: String,
    /// The completed level.
    pub level: String,
}

/// Payload for the `session_reset` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResetPayload {
    /// Session that was reset.
    pub session_id: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Notifications emitted by the controller.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum DisclosureEvent {
    /// Sent to a WebSocket client when it connects.
    Connected(ConnectedPayload),
    /// A request was admitted.
    Loading(LoadingPayload),
    /// A level was served.
    Response(ResponsePayload),
    /// A follow-up was answered.
    FollowUpResponse(FollowUpPayload),
    /// A request failed.
    Error(ErrorPayload),
    /// A level was completed.
    LevelCompleted(LevelCompletedPayload),
    /// A session was reset.
    SessionReset(SessionResetPayload),
    /// A session was opened on behalf of a WebSocket client.
    SessionOpened(Box<SessionSnapshot>),
}

impl DisclosureEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(levels: Vec<Level>, dwell_secs: u64, busy: bool) -> Self {
        Self::Connected(ConnectedPayload {
            levels,
            dwell_secs,
            busy,
        })
    }

    /// Creates a `Loading` event.
    #[must_use]
    pub fn loading(session_id: impl Into<String>, level: &Level, follow_up: bool) -> Self {
        Self::Loading(LoadingPayload {
            session_id: session_id.into(),
            level: level.id.clone(),
            title: level.title.clone(),
            follow_up,
        })
    }

    /// Creates a `Response` event.
    #[must_use]
    pub fn response(
        session_id: impl Into<String>,
        level: &Level,
        text: impl Into<String>,
        can_proceed: bool,
    ) -> Self {
        Self::Response(ResponsePayload {
            session_id: session_id.into(),
            level: level.id.clone(),
            title: level.title.clone(),
            text: text.into(),
            can_proceed,
        })
    }

    /// Creates a `FollowUpResponse` event.
    #[must_use]
    pub fn follow_up_response(
        session_id: impl Into<String>,
        level: impl Into<String>,
        question: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::FollowUpResponse(FollowUpPayload {
            session_id: session_id.into(),
            level: level.into(),
            question: question.into(),
            text: text.into(),
        })
    }

    /// Creates an `Error` event describing `error`.
    #[must_use]
    pub fn error(session_id: Option<String>, error: &DisclosureError) -> Self {
        Self::Error(ErrorPayload {
            session_id,
            message: error.to_string(),
            kind: error.kind().to_string(),
            remaining_seconds: error.remaining_secs(),
        })
    }

    /// Creates an `Error` event for a failure outside the controller, such as
    /// an unreadable client command.
    #[must_use]
    pub fn error_message(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            session_id: None,
            message: message.into(),
            kind: kind.into(),
            remaining_seconds: None,
        })
    }

    /// Creates a `LevelCompleted` event.
    #[must_use]
    pub fn level_completed(session_id: impl Into<String>, level: impl Into<String>) -> Self {
        Self::LevelCompleted(LevelCompletedPayload {
            session_id: session_id.into(),
            level: level.into(),
        })
    }

    /// Creates a `SessionReset` event.
    #[must_use]
    pub fn session_reset(session_id: impl Into<String>) -> Self {
        Self::SessionReset(SessionResetPayload {
            session_id: session_id.into(),
        })
    }

    /// Creates a `SessionOpened` event.
    #[must_use]
    pub fn session_opened(snapshot: SessionSnapshot) -> Self {
        Self::SessionOpened(Box::new(snapshot))
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Loading(_) => "loading",
            Self::Response(_) => "response",
            Self::FollowUpResponse(_) => "follow_up_response",
            Self::Error(_) => "error",
            Self::LevelCompleted(_) => "level_completed",
            Self::SessionReset(_) => "session_reset",
            Self::SessionOpened(_) => "session_opened",
        }
    }

    /// The session this event belongs to, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Connected(_) => None,
            Self::Loading(p) => Some(&p.session_id),
            Self::Response(p) => Some(&p.session_id),
            Self::FollowUpResponse(p) => Some(&p.session_id),
            Self::Error(p) => p.session_id.as_deref(),
            Self::LevelCompleted(p) => Some(&p.session_id),
            Self::SessionReset(p) => Some(&p.session_id),
            Self::SessionOpened(s) => Some(&s.session_id),
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Broadcasts controller events to every subscriber.
///
/// Uses a tokio broadcast channel for pub-sub event distribution.
/// Events are not persisted for disconnected clients.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<DisclosureEvent>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the specified buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber for receiving events.
    ///
    /// A subscriber that falls behind receives a `Lagged` error and misses
    /// the oldest events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DisclosureEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers will receive it.
    pub fn send(&self, event: DisclosureEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

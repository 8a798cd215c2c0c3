//! The progressive disclosure session controller.
//!
//! [`DisclosureController`] owns the sessions, the level registry and the
//! admission gate. Every level request goes through the same ordered checks:
//!
//! 1. admission (`BUSY` if another request is in flight),
//! 2. session lookup (`NO_SESSION`),
//! 3. level lookup (`UNKNOWN_LEVEL`),
//! 4. reachability and dwell time (`OUT_OF_ORDER`, `TOO_SOON`).
//!
//! Only then is the worker invoked. The admission permit is held for the
//! whole invocation and released on every outcome. The session map lock is
//! never held while the worker runs. Once `loading` has been emitted, the
//! request always ends in `response` or `error`, even if the caller drops it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use learnsor_worker::{RequestKind, Worker, WorkerRequest};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::access::check_level_access;
use crate::admission::RequestAdmission;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{DisclosureError, Result};
use crate::events::{DisclosureEvent, EventBroadcaster, DEFAULT_EVENT_CAPACITY};
use crate::levels::{Level, LevelRegistry};
use crate::router::extract_tier;
use crate::session::{FollowUpRecord, SessionContext, SessionSnapshot, SessionState};

// ============================================================================
// Options and Responses
// ============================================================================

/// Timing and buffering settings for a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Minimum time on a level before the next one unlocks.
    pub dwell: Duration,
    /// Hard limit on one worker invocation.
    pub worker_deadline: Duration,
    /// Events buffered per subscriber.
    pub event_capacity: usize,
    /// Sessions untouched for this long are discarded.
    pub session_idle: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(60),
            worker_deadline: Duration::from_secs(45),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            session_idle: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl From<&Config> for ControllerOptions {
    fn from(config: &Config) -> Self {
        Self {
            dwell: config.dwell(),
            worker_deadline: config.worker_deadline(),
            event_capacity: config.event_capacity,
            session_idle: config.session_idle(),
        }
    }
}

/// A served level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelResponse {
    /// Session the level was served to.
    pub session_id: String,
    /// Level id.
    pub level: String,
    /// Position of the level in the registry.
    pub level_index: usize,
    /// Level title.
    pub title: String,
    /// Hint text for the level.
    pub text: String,
    /// Whether a further level exists.
    pub can_proceed: bool,
}

/// An answered follow-up question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpResponse {
    /// Session the answer belongs to.
    pub session_id: String,
    /// Level that was current when the question was asked.
    pub level: String,
    /// The follow-up question.
    pub question: String,
    /// The answer.
    pub text: String,
}

// ============================================================================
// DisclosureController
// ============================================================================

/// Gates level requests and routes them to the hint worker.
///
/// Sessions on one controller share a single admission gate; separate
/// controllers never block each other.
#[derive(Debug)]
pub struct DisclosureController {
    registry: LevelRegistry,
    sessions: Mutex<HashMap<String, SessionState>>,
    next_epoch: AtomicU64,
    admission: RequestAdmission,
    worker: Arc<dyn Worker>,
    clock: Arc<dyn Clock>,
    events: EventBroadcaster,
    options: ControllerOptions,
}

impl DisclosureController {
    /// Creates a controller using the wall clock.
    #[must_use]
    pub fn new(registry: LevelRegistry, worker: Arc<dyn Worker>, options: ControllerOptions) -> Self {
        Self {
            registry,
            sessions: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(0),
            admission: RequestAdmission::new(),
            worker,
            clock: Arc::new(SystemClock),
            events: EventBroadcaster::new(options.event_capacity),
            options,
        }
    }

    /// Creates a controller from a loaded configuration.
    pub fn from_config(config: &Config, worker: Arc<dyn Worker>) -> Result<Self> {
        Ok(Self::new(
            config.level_registry()?,
            worker,
            ControllerOptions::from(config),
        ))
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The level registry.
    #[must_use]
    pub const fn levels(&self) -> &LevelRegistry {
        &self.registry
    }

    /// The controller's settings.
    #[must_use]
    pub const fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// The event broadcaster.
    #[must_use]
    pub const fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Subscribes to controller events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DisclosureEvent> {
        self.events.subscribe()
    }

    /// Returns `true` while a request is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.admission.is_busy()
    }

    /// Number of open sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    /// Opens a session, or rebinds an existing one.
    ///
    /// Re-opening with the same code and question keeps progress. A different
    /// code or question resets the session to the first level and emits
    /// `session_reset`. Other sessions idle past `session_idle` are dropped.
    #[instrument(skip(self, context), fields(session = %session_id))]
    pub async fn open_session(&self, session_id: &str, context: SessionContext) -> SessionSnapshot {
        let now = self.clock.now();
        let mut reset = false;

        let snapshot = {
            let mut sessions = self.sessions.lock().await;
            self.evict_idle(&mut sessions, Some(session_id));

            let state = match sessions.entry(session_id.to_string()) {
                Entry::Occupied(entry) => {
                    let state = entry.into_mut();
                    if state.context().same_binding(&context) {
                        debug!("Session re-opened with the same code and question");
                        state.refresh_file_context(context);
                        state.touch(now);
                    } else {
                        info!("Session rebound to new code or question, progress reset");
                        state.reset(context, self.next_epoch(), now);
                        reset = true;
                    }
                    state
                }
                Entry::Vacant(entry) => {
                    info!(filename = ?context.filename, "Session opened");
                    let epoch = self.next_epoch();
                    entry.insert(SessionState::new(session_id, context, now).with_epoch(epoch))
                }
            };
            state.snapshot(&self.registry, now, self.options.dwell)
        };

        if reset {
            self.events.send(DisclosureEvent::session_reset(session_id));
        }
        snapshot
    }

    /// Current view of a session.
    pub async fn snapshot(&self, session_id: &str) -> std::result::Result<SessionSnapshot, DisclosureError> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|state| state.snapshot(&self.registry, self.clock.now(), self.options.dwell))
            .ok_or_else(|| DisclosureError::no_session(session_id))
    }

    /// Discards a session. An in-flight request for it completes with `SESSION_RESET`.
    #[instrument(skip(self), fields(session = %session_id))]
    pub async fn close_session(&self, session_id: &str) -> std::result::Result<(), DisclosureError> {
        let removed = self.sessions.lock().await.remove(session_id);
        if removed.is_none() {
            return Err(DisclosureError::no_session(session_id));
        }
        info!("Session closed");
        Ok(())
    }

    /// Drops every session idle past `session_idle`. Returns how many were dropped.
    pub async fn evict_idle_sessions(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.evict_idle(&mut sessions, None)
    }

    fn evict_idle(&self, sessions: &mut HashMap<String, SessionState>, keep: Option<&str>) -> usize {
        let now = self.clock.now();
        let before = sessions.len();
        sessions.retain(|id, state| {
            keep == Some(id.as_str()) || !state.is_idle(now, self.options.session_idle)
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Idle sessions discarded");
        }
        evicted
    }

    fn next_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Serves `level_id` to a session if the access checks allow it.
    ///
    /// Emits `loading` once admitted, then `response` and `level_completed`
    /// on success, or `error` on any rejection or failure.
    #[instrument(skip(self), fields(session = %session_id, level = %level_id))]
    pub async fn request_level(
        &self,
        session_id: &str,
        level_id: &str,
    ) -> std::result::Result<LevelResponse, DisclosureError> {
        let outcome = self.serve_level(session_id, level_id).await;
        if let Err(error) = &outcome {
            self.report(session_id, error);
        }
        outcome
    }

    /// Answers a follow-up question in the context of the current level.
    ///
    /// Follow-ups skip the reachability and dwell checks but still need the
    /// admission gate. They never change progress.
    #[instrument(skip(self, question), fields(session = %session_id))]
    pub async fn ask_follow_up(
        &self,
        session_id: &str,
        question: &str,
    ) -> std::result::Result<FollowUpResponse, DisclosureError> {
        let outcome = self.answer_follow_up(session_id, question).await;
        if let Err(error) = &outcome {
            self.report(session_id, error);
        }
        outcome
    }

    async fn serve_level(
        &self,
        session_id: &str,
        level_id: &str,
    ) -> std::result::Result<LevelResponse, DisclosureError> {
        let permit = self.admission.try_admit().ok_or(DisclosureError::Busy)?;

        let (index, level, request, epoch) = {
            let sessions = self.sessions.lock().await;
            let state = sessions
                .get(session_id)
                .ok_or_else(|| DisclosureError::no_session(session_id))?;
            let (index, level) = self.resolve_level(level_id)?;
            let grant = check_level_access(state, index, level_id, self.clock.now(), self.options.dwell)?;
            debug!(?grant, index, "Level request admitted");

            let context = state.context();
            let request = worker_request(RequestKind::Level, context, &level.id, &context.question);
            (index, level, request, state.epoch())
        };

        self.events.send(DisclosureEvent::loading(session_id, level, false));

        let started = Instant::now();
        let pending = PendingResponse::new(&self.events, session_id);
        let outcome = self.generate(&request, index, level, session_id, epoch).await;
        pending.settle();
        let text = outcome?;
        drop(permit);

        let can_proceed = !self.registry.is_last(index);
        info!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            can_proceed,
            "Level served"
        );

        self.events.send(DisclosureEvent::response(session_id, level, &text, can_proceed));
        self.events.send(DisclosureEvent::level_completed(session_id, &level.id));

        Ok(LevelResponse {
            session_id: session_id.to_string(),
            level: level.id.clone(),
            level_index: index,
            title: level.title.clone(),
            text,
            can_proceed,
        })
    }

    async fn answer_follow_up(
        &self,
        session_id: &str,
        question: &str,
    ) -> std::result::Result<FollowUpResponse, DisclosureError> {
        let permit = self.admission.try_admit().ok_or(DisclosureError::Busy)?;

        let (index, level, request, epoch) = {
            let sessions = self.sessions.lock().await;
            let state = sessions
                .get(session_id)
                .ok_or_else(|| DisclosureError::no_session(session_id))?;
            let index = state.current_level_index();
            let level = self
                .registry
                .level_at(index)
                .ok_or_else(|| DisclosureError::unknown_level(index.to_string()))?;

            let request = worker_request(RequestKind::FollowUp, state.context(), &level.id, question);
            (index, level, request, state.epoch())
        };

        self.events.send(DisclosureEvent::loading(session_id, level, true));

        let started = Instant::now();
        let pending = PendingResponse::new(&self.events, session_id);
        let outcome = self.generate(&request, index, level, session_id, epoch).await;
        pending.settle();
        let text = outcome?;
        drop(permit);

        info!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            level = %level.id,
            "Follow-up answered"
        );
        self.events.send(DisclosureEvent::follow_up_response(session_id, &level.id, question, &text));

        Ok(FollowUpResponse {
            session_id: session_id.to_string(),
            level: level.id.clone(),
            question: question.to_string(),
            text,
        })
    }

    /// Invokes the worker and records the result, unless the session was
    /// closed or rebound in the meantime.
    async fn generate(
        &self,
        request: &WorkerRequest,
        index: usize,
        level: &Level,
        session_id: &str,
        epoch: u64,
    ) -> std::result::Result<String, DisclosureError> {
        let result = self.worker.invoke(request, self.options.worker_deadline).await?;
        let text = extract_tier(&result, level, &self.registry);

        let mut sessions = self.sessions.lock().await;
        let state = sessions
            .get_mut(session_id)
            .filter(|state| state.epoch() == epoch)
            .ok_or(DisclosureError::SessionReset)?;
        let now = self.clock.now();
        match request.kind {
            RequestKind::Level => {
                state.record_served(index, now);
            }
            RequestKind::FollowUp => state.record_follow_up(FollowUpRecord {
                level_id: level.id.clone(),
                question: request.question.clone(),
                answer: text.clone(),
                answered_at: now,
            }),
        }
        Ok(text)
    }

    fn resolve_level(&self, level_id: &str) -> std::result::Result<(usize, &Level), DisclosureError> {
        self.registry
            .level_index_of(level_id)
            .and_then(|index| self.registry.level_at(index).map(|level| (index, level)))
            .ok_or_else(|| DisclosureError::unknown_level(level_id))
    }

    fn report(&self, session_id: &str, error: &DisclosureError) {
        if error.is_rejection() {
            info!(kind = error.kind(), "Request rejected: {error}");
        } else {
            warn!(kind = error.kind(), "Request failed: {error}");
        }
        self.events
            .send(DisclosureEvent::error(Some(session_id.to_string()), error));
    }
}

/// Emits a `CANCELLED` error if dropped before [`settle`](Self::settle).
///
/// Armed once `loading` has gone out, so subscribers always see the request end.
struct PendingResponse<'a> {
    events: &'a EventBroadcaster,
    session_id: &'a str,
    armed: bool,
}

impl<'a> PendingResponse<'a> {
    const fn new(events: &'a EventBroadcaster, session_id: &'a str) -> Self {
        Self {
            events,
            session_id,
            armed: true,
        }
    }

    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(session = %self.session_id, "Request dropped before the worker finished");
            self.events.send(DisclosureEvent::error(
                Some(self.session_id.to_string()),
                &DisclosureError::Cancelled,
            ));
        }
    }
}

fn worker_request(
    kind: RequestKind,
    context: &SessionContext,
    level_id: &str,
    question: &str,
) -> WorkerRequest {
    WorkerRequest::new(kind, context.code.as_str(), question, level_id)
        .with_filename(context.filename.clone())
        .with_project_context(context.project_path.clone())
}

// ============================================================================
// Tests
// ============================================================================

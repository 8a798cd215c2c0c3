//! Per-session progress state.
//!
//! A session is bound to one (code, question) pair. It records how far the
//! learner has progressed through the levels and when each level was last
//! served, which is what the dwell check reads.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::remaining_wait_secs;
use crate::levels::LevelRegistry;

/// Follow-up exchanges kept per session; older ones are dropped first.
pub const MAX_FOLLOW_UPS: usize = 50;

// ============================================================================
// SessionContext
// ============================================================================

/// What a session is about: the selected code and the learner's question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    /// The source text the learner selected.
    pub code: String,
    /// The learner's question about it.
    pub question: String,
    /// Name of the file the code came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Path of the project the file belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

impl SessionContext {
    /// Creates a context with no file information.
    #[must_use]
    pub fn new(code: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            question: question.into(),
            filename: None,
            project_path: None,
        }
    }

    /// Sets the originating filename.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the project path.
    #[must_use]
    pub fn with_project_path(mut self, project_path: impl Into<String>) -> Self {
        self.project_path = Some(project_path.into());
        self
    }

    /// Returns `true` if both contexts bind the same code and question.
    #[must_use]
    pub fn same_binding(&self, other: &Self) -> bool {
        self.code == other.code && self.question == other.question
    }
}

// ============================================================================
// FollowUpRecord
// ============================================================================

/// A follow-up question and the answer it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpRecord {
    /// Level that was current when the question was asked.
    pub level_id: String,
    /// The follow-up question.
    pub question: String,
    /// The worker's answer.
    pub answer: String,
    /// When the answer arrived.
    pub answered_at: DateTime<Utc>,
}

// ============================================================================
// SessionState
// ============================================================================

/// Progress of one session through the level registry.
///
/// `current_level_index` only moves forward, except through [`reset`](Self::reset).
/// A timestamp exists for a level only once that level has been served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    id: String,
    context: SessionContext,
    current_level_index: usize,
    level_unlock_timestamps: BTreeMap<usize, DateTime<Utc>>,
    follow_ups: Vec<FollowUpRecord>,
    epoch: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Creates a fresh session at the first level.
    #[must_use]
    pub fn new(id: impl Into<String>, context: SessionContext, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            context,
            current_level_index: 0,
            level_unlock_timestamps: BTreeMap::new(),
            follow_ups: Vec::new(),
            epoch: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the binding epoch.
    #[must_use]
    pub const fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    /// The session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The bound code and question.
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Index of the highest level served so far (0 before anything is served).
    #[must_use]
    pub const fn current_level_index(&self) -> usize {
        self.current_level_index
    }

    /// When level `index` was last served.
    #[must_use]
    pub fn unlock_timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        self.level_unlock_timestamps.get(&index).copied()
    }

    /// Follow-up questions answered in this session.
    #[must_use]
    pub fn follow_ups(&self) -> &[FollowUpRecord] {
        &self.follow_ups
    }

    /// Identifies the current (code, question) binding.
    ///
    /// The controller hands out epochs from one counter, so a value is never
    /// reused, not even by a later session with the same id.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// When the session last changed.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns `true` if nothing happened in the session for at least `ttl`.
    #[must_use]
    pub fn is_idle(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.updated_at)
            .to_std()
            .is_ok_and(|idle| idle >= ttl)
    }

    /// Marks the session as active.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }

    /// Rebinds the session to a new context under `epoch` and clears all progress.
    pub fn reset(&mut self, context: SessionContext, epoch: u64, now: DateTime<Utc>) {
        self.context = context;
        self.current_level_index = 0;
        self.level_unlock_timestamps.clear();
        self.follow_ups.clear();
        self.epoch = epoch;
        self.updated_at = now;
    }

    /// Updates file information without touching progress.
    pub fn refresh_file_context(&mut self, context: SessionContext) {
        if context.filename.is_some() {
            self.context.filename = context.filename;
        }
        if context.project_path.is_some() {
            self.context.project_path = context.project_path;
        }
    }

    /// Records a successful response for level `index`.
    ///
    /// Serving the current or next level moves progress there and stamps it
    /// with `now`; serving a lower level changes nothing. Returns `true` if
    /// the state changed.
    pub fn record_served(&mut self, index: usize, now: DateTime<Utc>) -> bool {
        if index < self.current_level_index {
            return false;
        }
        self.current_level_index = index;
        self.level_unlock_timestamps.insert(index, now);
        self.updated_at = now;
        true
    }

    /// Appends a follow-up exchange. Progress is not affected.
    ///
    /// At most [`MAX_FOLLOW_UPS`] exchanges are kept.
    pub fn record_follow_up(&mut self, record: FollowUpRecord) {
        self.updated_at = record.answered_at;
        self.follow_ups.push(record);
        if self.follow_ups.len() > MAX_FOLLOW_UPS {
            let excess = self.follow_ups.len() - MAX_FOLLOW_UPS;
            self.follow_ups.drain(..excess);
        }
    }

    /// Point-in-time view of the session for callers.
    #[must_use]
    pub fn snapshot(
        &self,
        registry: &LevelRegistry,
        now: DateTime<Utc>,
        dwell: Duration,
    ) -> SessionSnapshot {
        let current = registry.level_at(self.current_level_index);
        let next_index = self.current_level_index + 1;
        let next = registry.level_at(next_index);

        let next_unlock_in_secs = next.and_then(|_| {
            self.unlock_timestamp(self.current_level_index)
                .map(|served| remaining_wait_secs(now, served, dwell))
        });

        let levels = registry
            .iter()
            .enumerate()
            .map(|(index, level)| LevelProgress {
                id: level.id.clone(),
                title: level.title.clone(),
                served_at: self.unlock_timestamp(index),
                locked: index > self.current_level_index
                    && !(index == next_index && next_unlock_in_secs == Some(0)),
            })
            .collect();

        SessionSnapshot {
            session_id: self.id.clone(),
            code: self.context.code.clone(),
            question: self.context.question.clone(),
            filename: self.context.filename.clone(),
            current_level: current.map(|level| level.id.clone()).unwrap_or_default(),
            current_level_index: self.current_level_index,
            next_level: next.map(|level| level.id.clone()),
            next_unlock_in_secs,
            levels,
            follow_ups: self.follow_ups.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// ============================================================================
// SessionSnapshot
// ============================================================================

/// Progress on a single level, as reported in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    /// Level id.
    pub id: String,
    /// Level title.
    pub title: String,
    /// When the level was last served, if ever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_at: Option<DateTime<Utc>>,
    /// Whether a request for this level would currently be refused.
    pub locked: bool,
}

/// Serializable view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session id.
    pub session_id: String,
    /// Bound code.
    pub code: String,
    /// Bound question.
    pub question: String,
    /// Originating filename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Id of the current level.
    pub current_level: String,
    /// Index of the current level.
    pub current_level_index: usize,
    /// Id of the next level, absent on the last level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_level: Option<String>,
    /// Seconds until the next level unlocks; absent until the current level is served.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_unlock_in_secs: Option<u64>,
    /// Per-level progress in registry order.
    pub levels: Vec<LevelProgress>,
    /// Follow-up history.
    pub follow_ups: Vec<FollowUpRecord>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session last changed.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================

//! Learnsor Worker Invocation
//!
//! The hint-generation worker is an opaque external function: given code, a
//! question, a target level and optional file context, it produces text for
//! one or more disclosure tiers.
//!
//! This crate provides the types exchanged with the worker, the [`Worker`]
//! capability trait the session controller depends on, a process-backed
//! implementation ([`ProcessWorker`]) and a scripted implementation
//! ([`ScriptedWorker`]) for tests and local development.

pub mod language;
pub mod mock;
pub mod process;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use language::{comment_delimiters, detect_language, DEFAULT_LANGUAGE};
pub use mock::ScriptedWorker;
pub use process::{ProcessWorker, WorkerCommand};

/// Errors produced at the worker boundary.
///
/// None of these are retried automatically; the caller decides whether to
/// re-issue the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The worker did not finish before its deadline and was terminated.
    #[error("hint generation timed out after {}", format_deadline(.deadline_ms))]
    Timeout {
        /// The deadline that expired, in milliseconds.
        deadline_ms: u64,
    },

    /// The worker process could not be started, even through the fallback path.
    #[error("failed to launch hint worker '{program}': {message}")]
    LaunchFailed {
        /// The last program that was attempted.
        program: String,
        /// Description of the launch failure.
        message: String,
    },

    /// The worker exited unsuccessfully or reported an error.
    #[error("hint worker failed{}: {diagnostic}", exit_code_suffix(.exit_code))]
    Failed {
        /// Process exit code, if the worker exited on its own.
        exit_code: Option<i32>,
        /// Truncated diagnostic output.
        diagnostic: String,
    },

    /// The worker produced output that is not a tier mapping.
    #[error("could not parse hint worker output: {message}")]
    Parse {
        /// Description of the parse failure.
        message: String,
    },
}

impl WorkerError {
    /// Creates a new `Timeout` error for the given deadline.
    #[must_use]
    pub fn timeout(deadline: Duration) -> Self {
        Self::Timeout {
            deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a new `LaunchFailed` error.
    #[must_use]
    pub fn launch_failed(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Failed` error.
    #[must_use]
    pub fn failed(exit_code: Option<i32>, diagnostic: impl Into<String>) -> Self {
        Self::Failed {
            exit_code,
            diagnostic: diagnostic.into(),
        }
    }

    /// Creates a new `Parse` error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this failure.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TIMEOUT",
            Self::LaunchFailed { .. } => "LAUNCH_FAILED",
            Self::Failed { .. } => "WORKER_ERROR",
            Self::Parse { .. } => "PARSE_ERROR",
        }
    }
}

/// Whole seconds when exact, milliseconds otherwise.
#[allow(clippy::trivially_copy_pass_by_ref)]
fn format_deadline(deadline_ms: &u64) -> String {
    let deadline_ms = *deadline_ms;
    if deadline_ms >= 1000 && deadline_ms % 1000 == 0 {
        format!("{}s", deadline_ms / 1000)
    } else {
        format!("{deadline_ms}ms")
    }
}

fn exit_code_suffix(exit_code: &Option<i32>) -> String {
    exit_code.map(|code| format!(" (exit code {code})")).unwrap_or_default()
}

/// Whether a request targets a disclosure level or is a follow-up question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// A level-scoped request that may advance progress.
    #[default]
    Level,
    /// An unscoped follow-up question answered in the context of the current level.
    FollowUp,
}

/// A single request handed to the worker on its standard input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    /// Level request or follow-up.
    pub kind: RequestKind,
    /// The source text the learner selected.
    pub code: String,
    /// The learner's question (or the follow-up question).
    pub question: String,
    /// Identifier of the level the worker should produce text for.
    pub target_level: String,
    /// Name of the file the code came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Path of the project the file belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_context: Option<String>,
    /// Programming language detected from the filename.
    pub language: String,
    /// Opening delimiter of a block comment in `language`.
    pub comment_start: String,
    /// Closing delimiter of a block comment in `language`.
    pub comment_end: String,
}

impl WorkerRequest {
    /// Creates a request with no file context; the language defaults to Python.
    #[must_use]
    pub fn new(
        kind: RequestKind,
        code: impl Into<String>,
        question: impl Into<String>,
        target_level: impl Into<String>,
    ) -> Self {
        let (start, end) = comment_delimiters(DEFAULT_LANGUAGE);
        Self {
            kind,
            code: code.into(),
            question: question.into(),
            target_level: target_level.into(),
            filename: None,
            project_context: None,
            language: DEFAULT_LANGUAGE.to_string(),
            comment_start: start.to_string(),
            comment_end: end.to_string(),
        }
    }

    /// Sets the originating filename and re-detects the language from it.
    #[must_use]
    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        let language = detect_language(filename.as_deref());
        let (start, end) = comment_delimiters(language);
        self.language = language.to_string();
        self.comment_start = start.to_string();
        self.comment_end = end.to_string();
        self.filename = filename;
        self
    }

    /// Sets the project context path.
    #[must_use]
    pub fn with_project_context(mut self, project_context: Option<String>) -> Self {
        self.project_context = project_context;
        self
    }
}

/// Text produced by the worker, keyed by tier.
///
/// A worker may fill several tiers in one call; the controller surfaces only
/// the tier belonging to the requested level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerResult {
    tiers: BTreeMap<String, String>,
}

impl WorkerResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tier to the result.
    #[must_use]
    pub fn with_tier(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.tiers.insert(key.into(), text.into());
        self
    }

    /// Returns the text of a tier if it is present and not blank.
    #[must_use]
    pub fn tier(&self, key: &str) -> Option<&str> {
        self.tiers
            .get(key)
            .map(String::as_str)
            .filter(|text| !text.trim().is_empty())
    }

    /// Iterates over non-blank tiers in key order.
    pub fn non_empty_tiers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tiers
            .iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(key, text)| (key.as_str(), text.as_str()))
    }

    /// Number of tiers, blank ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Returns `true` if the worker produced no tiers at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for WorkerResult {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            tiers: iter
                .into_iter()
                .map(|(key, text)| (key.into(), text.into()))
                .collect(),
        }
    }
}

/// Capability to execute the hint-generation function.
///
/// Implementations run exactly one generation per call and must give up once
/// `deadline` has elapsed. They are unaware of admission policy: the session
/// controller guarantees that calls never overlap.
#[async_trait]
pub trait Worker: Send + Sync + std::fmt::Debug {
    /// Runs the worker for `request`, bounded by `deadline`.
    async fn invoke(
        &self,
        request: &WorkerRequest,
        deadline: Duration,
    ) -> Result<WorkerResult, WorkerError>;
}

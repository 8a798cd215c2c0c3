//! Error types for the Learnsor session controller.
//!
//! Two hierarchies live here:
//! - [`LearnsorError`] covers startup concerns (configuration files and
//!   level definitions) and carries actionable suggestions.
//! - [`DisclosureError`] is the outcome of a rejected or failed request. Each
//!   variant has a stable [`kind`](DisclosureError::kind) code and a message
//!   that is safe to show to the learner.

use std::path::PathBuf;

use learnsor_worker::WorkerError;

/// A specialized `Result` type for Learnsor startup operations.
pub type Result<T> = std::result::Result<T, LearnsorError>;

/// Errors that can occur while configuring the controller.
#[derive(Debug, thiserror::Error)]
pub enum LearnsorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your learnsor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Level Registry Errors
    // ========================================================================
    /// The level list cannot be used to build a registry.
    #[error("Invalid level definition: {message}\n\nSuggestion: Check the 'levels' array in learnsor.json")]
    InvalidLevels {
        /// Description of the problem.
        message: String,
    },
}

impl LearnsorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidLevels` error.
    #[must_use]
    pub fn invalid_levels(message: impl Into<String>) -> Self {
        Self::InvalidLevels {
            message: message.into(),
        }
    }
}

/// Why a level request or follow-up did not produce a response.
///
/// `Worker`, `SessionReset` and `Cancelled` happen after admission; every
/// other variant is a rejection that leaves session state untouched and never
/// reaches the worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisclosureError {
    /// Another request is already being generated.
    #[error("A hint is already being generated. Please wait for it to finish.")]
    Busy,

    /// No session exists with the given id.
    #[error("Session '{session_id}' not found. Ask a question about your code to start one.")]
    NoSession {
        /// The unknown session id.
        session_id: String,
    },

    /// The requested level id is not in the registry.
    #[error("Unknown level '{level_id}'.")]
    UnknownLevel {
        /// The unknown level id.
        level_id: String,
    },

    /// The requested level skips ahead of the unlocked progress.
    #[error("Level '{level_id}' is locked. Please complete previous levels first.")]
    OutOfOrder {
        /// The requested level id.
        level_id: String,
    },

    /// The dwell time on the current level has not elapsed yet.
    #[error("Please spend a little more time on the current level. '{level_id}' unlocks in {remaining_secs} seconds.")]
    TooSoon {
        /// The requested level id.
        level_id: String,
        /// Whole seconds until the level may be requested, rounded up.
        remaining_secs: u64,
    },

    /// The session was reset while the request was in flight.
    #[error("The session was reset while the hint was being generated. Please ask again.")]
    SessionReset,

    /// The caller went away before the worker finished.
    #[error("The hint request was cancelled before it finished. Please ask again.")]
    Cancelled,

    /// The worker failed after the request was admitted.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl DisclosureError {
    /// Creates a new `NoSession` error.
    #[must_use]
    pub fn no_session(session_id: impl Into<String>) -> Self {
        Self::NoSession {
            session_id: session_id.into(),
        }
    }

    /// Creates a new `UnknownLevel` error.
    #[must_use]
    pub fn unknown_level(level_id: impl Into<String>) -> Self {
        Self::UnknownLevel {
            level_id: level_id.into(),
        }
    }

    /// Creates a new `OutOfOrder` error.
    #[must_use]
    pub fn out_of_order(level_id: impl Into<String>) -> Self {
        Self::OutOfOrder {
            level_id: level_id.into(),
        }
    }

    /// Creates a new `TooSoon` error.
    #[must_use]
    pub fn too_soon(level_id: impl Into<String>, remaining_secs: u64) -> Self {
        Self::TooSoon {
            level_id: level_id.into(),
            remaining_secs,
        }
    }

    /// Stable machine-readable code for this outcome.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Busy => "BUSY",
            Self::NoSession { .. } => "NO_SESSION",
            Self::UnknownLevel { .. } => "UNKNOWN_LEVEL",
            Self::OutOfOrder { .. } => "OUT_OF_ORDER",
            Self::TooSoon { .. } => "TOO_SOON",
            Self::SessionReset => "SESSION_RESET",
            Self::Cancelled => "CANCELLED",
            Self::Worker(e) => e.kind(),
        }
    }

    /// Seconds to wait before retrying, for `TooSoon`.
    #[must_use]
    pub const fn remaining_secs(&self) -> Option<u64> {
        match self {
            Self::TooSoon { remaining_secs, .. } => Some(*remaining_secs),
            _ => None,
        }
    }

    /// Returns `true` if re-issuing the same request later may succeed.
    ///
    /// Nothing is retried automatically; this only informs the caller.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Busy
                | Self::TooSoon { .. }
                | Self::SessionReset
                | Self::Cancelled
                | Self::Worker(WorkerError::Timeout { .. } | WorkerError::Failed { .. })
        )
    }

    /// Returns `true` if the request was refused before reaching the worker.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Worker(_) | Self::SessionReset | Self::Cancelled)
    }
}

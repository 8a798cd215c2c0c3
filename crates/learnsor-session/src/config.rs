//! Configuration for the Learnsor session controller.
//!
//! Settings are read from `learnsor.json`. Every field has a default, so a
//! missing file or an empty object yields a working configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use learnsor_worker::process::{default_fallback_program, DEFAULT_DIAGNOSTIC_TAIL_CHARS};
use learnsor_worker::{ProcessWorker, WorkerCommand};
use serde::{Deserialize, Serialize};

use crate::error::{LearnsorError, Result};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::levels::{default_levels, validate_levels, Level, LevelRegistry};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "learnsor.json";

/// Default minimum time on a level before the next one unlocks.
const fn default_dwell_ms() -> u64 {
    60_000
}

/// Default hard limit on a single worker invocation.
const fn default_worker_deadline_ms() -> u64 {
    45_000
}

/// Default time after which an untouched session is dropped.
const fn default_session_idle_ms() -> u64 {
    2 * 60 * 60 * 1000
}

const fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["hint_worker.py".to_string()]
}

#[allow(clippy::unnecessary_wraps)]
fn default_fallback() -> Option<String> {
    Some(default_fallback_program().to_string())
}

const fn default_diagnostic_tail_chars() -> usize {
    DEFAULT_DIAGNOSTIC_TAIL_CHARS
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Minimum dwell time on a level, in milliseconds.
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,

    /// Deadline for one worker invocation, in milliseconds.
    #[serde(default = "default_worker_deadline_ms")]
    pub worker_deadline_ms: u64,

    /// How the worker process is launched.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Ordered level definitions.
    #[serde(default = "default_levels")]
    pub levels: Vec<Level>,

    /// Events buffered per subscriber before slow subscribers lag.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Sessions with no activity for this long are discarded, in milliseconds.
    #[serde(default = "default_session_idle_ms")]
    pub session_idle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dwell_ms: default_dwell_ms(),
            worker_deadline_ms: default_worker_deadline_ms(),
            worker: WorkerConfig::default(),
            levels: default_levels(),
            event_capacity: default_event_capacity(),
            session_idle_ms: default_session_idle_ms(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `learnsor.json` in the current directory. If not found,
    /// returns the default configuration.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            LearnsorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `learnsor.json` from a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `LearnsorError::ConfigParseError` if the file cannot be read or
    /// is not valid JSON, and `LearnsorError::ConfigValidationError` or
    /// `LearnsorError::InvalidLevels` if the values are unusable.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(LearnsorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| LearnsorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// - `workerDeadlineMs` must be greater than 0
    /// - `eventCapacity` must be greater than 0
    /// - `sessionIdleMs` must be greater than 0
    /// - `worker.program` must not be empty
    /// - `levels` must form a valid registry
    ///
    /// A `dwellMs` of 0 is allowed and disables the dwell check.
    pub fn validate(&self) -> Result<()> {
        if self.worker_deadline_ms == 0 {
            return Err(LearnsorError::config_validation(
                "workerDeadlineMs must be greater than 0",
                "Set workerDeadlineMs to at least 1000 in your learnsor.json",
            ));
        }

        if self.event_capacity == 0 {
            return Err(LearnsorError::config_validation(
                "eventCapacity must be greater than 0",
                "Set eventCapacity to at least 1 in your learnsor.json (100 is typical)",
            ));
        }

        if self.session_idle_ms == 0 {
            return Err(LearnsorError::config_validation(
                "sessionIdleMs must be greater than 0",
                "Set sessionIdleMs to at least the dwell time in your learnsor.json (7200000 is two hours)",
            ));
        }

        if self.worker.program.trim().is_empty() {
            return Err(LearnsorError::config_validation(
                "worker.program must not be empty",
                "Set worker.program to the interpreter or binary that runs your hint worker",
            ));
        }

        if self.worker.diagnostic_tail_chars == 0 {
            return Err(LearnsorError::config_validation(
                "worker.diagnosticTailChars must be greater than 0",
                "Set worker.diagnosticTailChars to at least 1 in your learnsor.json",
            ));
        }

        validate_levels(&self.levels)
    }

    /// Dwell time as a `Duration`.
    #[must_use]
    pub const fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    /// Worker deadline as a `Duration`.
    #[must_use]
    pub const fn worker_deadline(&self) -> Duration {
        Duration::from_millis(self.worker_deadline_ms)
    }

    /// Session idle timeout as a `Duration`.
    #[must_use]
    pub const fn session_idle(&self) -> Duration {
        Duration::from_millis(self.session_idle_ms)
    }

    /// Builds the level registry.
    pub fn level_registry(&self) -> Result<LevelRegistry> {
        LevelRegistry::new(self.levels.clone())
    }
}

/// How to launch the hint worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Program to run.
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments for `program`.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Program tried once if `program` cannot be launched. `null` disables the fallback.
    #[serde(default = "default_fallback")]
    pub fallback_program: Option<String>,

    /// Arguments for the fallback; defaults to `args`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_args: Option<Vec<String>>,

    /// Working directory of the worker process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Extra environment variables for the worker process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Characters of stderr kept when the worker fails.
    #[serde(default = "default_diagnostic_tail_chars")]
    pub diagnostic_tail_chars: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            fallback_program: default_fallback(),
            fallback_args: None,
            working_dir: None,
            env: BTreeMap::new(),
            diagnostic_tail_chars: default_diagnostic_tail_chars(),
        }
    }
}

impl WorkerConfig {
    /// Builds the process worker described by this configuration.
    #[must_use]
    pub fn process_worker(&self) -> ProcessWorker {
        let primary = WorkerCommand::new(&self.program).with_args(self.args.iter().cloned());
        let mut worker = ProcessWorker::new(primary)
            .with_diagnostic_tail_chars(self.diagnostic_tail_chars);

        if let Some(program) = self.fallback_program.as_deref().filter(|p| !p.trim().is_empty()) {
            let args = self.fallback_args.as_ref().unwrap_or(&self.args);
            worker = worker.with_fallback(WorkerCommand::new(program).with_args(args.iter().cloned()));
        }
        if let Some(dir) = &self.working_dir {
            worker = worker.with_working_dir(dir);
        }
        for (key, value) in &self.env {
            worker = worker.with_env(key, value);
        }
        worker
    }
}

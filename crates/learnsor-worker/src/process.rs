//! Process-backed worker.
//!
//! This module provides [`ProcessWorker`], which runs the hint-generation
//! function as an external program. Each invocation spawns one process,
//! writes the [`WorkerRequest`] as JSON to its standard input and parses its
//! standard output as a JSON object mapping tier keys to text.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use crate::{Worker, WorkerError, WorkerRequest, WorkerResult};

/// Default number of characters kept from the worker's diagnostic output.
pub const DEFAULT_DIAGNOSTIC_TAIL_CHARS: usize = 500;

/// Terminal escape sequences that workers tend to leave in stderr.
#[allow(clippy::unwrap_used)]
static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// Program to execute, looked up on `PATH` if not absolute.
    pub program: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Creates a new command.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Program used for the fallback launch when the primary interpreter is missing.
///
/// Windows installs usually provide the `py` launcher rather than `python3`.
#[must_use]
pub const fn default_fallback_program() -> &'static str {
    if cfg!(windows) {
        "py"
    } else {
        "python"
    }
}

/// Runs the hint-generation worker as an external process.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use learnsor_worker::{ProcessWorker, RequestKind, Worker, WorkerCommand, WorkerRequest};
///
/// # async fn example() {
/// let worker = ProcessWorker::new(WorkerCommand::new("python3").with_arg("hint_worker.py"))
///     .with_fallback(WorkerCommand::new("python").with_arg("hint_worker.py"));
///
/// let request = WorkerRequest::new(RequestKind::Level, "print(1)", "How do I loop?", "concept");
/// let result = worker.invoke(&request, Duration::from_secs(45)).await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    primary: WorkerCommand,
    fallback: Option<WorkerCommand>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    diagnostic_tail_chars: usize,
}

impl ProcessWorker {
    /// Creates a worker that launches `primary` with no fallback.
    #[must_use]
    pub const fn new(primary: WorkerCommand) -> Self {
        Self {
            primary,
            fallback: None,
            working_dir: None,
            env: Vec::new(),
            diagnostic_tail_chars: DEFAULT_DIAGNOSTIC_TAIL_CHARS,
        }
    }

    /// Sets the command tried once when `primary` cannot be launched.
    #[must_use]
    pub fn with_fallback(mut self, fallback: WorkerCommand) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Sets the working directory of the worker process.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable for the worker process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets how many trailing characters of diagnostic output are surfaced.
    #[must_use]
    pub const fn with_diagnostic_tail_chars(mut self, chars: usize) -> Self {
        self.diagnostic_tail_chars = chars;
        self
    }

    /// The primary launch command.
    #[must_use]
    pub const fn primary(&self) -> &WorkerCommand {
        &self.primary
    }

    /// The fallback launch command, if any.
    #[must_use]
    pub const fn fallback(&self) -> Option<&WorkerCommand> {
        self.fallback.as_ref()
    }

    fn command(&self, launch: &WorkerCommand) -> Command {
        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Spawns the primary command, trying the fallback once on launch failure.
    fn spawn(&self) -> Result<Child, WorkerError> {
        let primary_err = match self.command(&self.primary).spawn() {
            Ok(child) => return Ok(child),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(WorkerError::launch_failed(
                &self.primary.program,
                primary_err.to_string(),
            ));
        };

        warn!(
            program = %self.primary.program,
            fallback = %fallback.program,
            error = %primary_err,
            "Primary worker launch failed, trying fallback"
        );

        self.command(fallback).spawn().map_err(|e| {
            WorkerError::launch_failed(
                &fallback.program,
                format!("{e} (after '{}' failed: {primary_err})", self.primary.program),
            )
        })
    }

    fn diagnostic(&self, stderr: &[u8], stdout: &[u8]) -> String {
        let tail = diagnostic_tail(stderr, self.diagnostic_tail_chars);
        if tail.is_empty() {
            let tail = diagnostic_tail(stdout, self.diagnostic_tail_chars);
            if tail.is_empty() {
                return "no diagnostic output".to_string();
            }
            return tail;
        }
        tail
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    #[instrument(skip(self, request), fields(kind = ?request.kind, level = %request.target_level))]
    async fn invoke(
        &self,
        request: &WorkerRequest,
        deadline: Duration,
    ) -> Result<WorkerResult, WorkerError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| WorkerError::failed(None, format!("cannot encode request: {e}")))?;

        let started = Instant::now();
        let mut child = self.spawn()?;
        debug!(pid = ?child.id(), "Worker process spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let exchange = async {
            let (_, out, err) = tokio::try_join!(
                write_request(stdin, &payload),
                read_pipe(stdout),
                read_pipe(stderr)
            )?;
            let status = child.wait().await?;
            Ok::<(ExitStatus, Vec<u8>, Vec<u8>), std::io::Error>((status, out, err))
        };

        let outcome = tokio::time::timeout(deadline, exchange).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (status, out, err) = match outcome {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                warn!(error = %e, elapsed_ms, "Worker I/O failed");
                return Err(WorkerError::failed(None, format!("worker I/O failed: {e}")));
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out worker");
                }
                warn!(
                    elapsed_ms,
                    deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    "Worker deadline expired, process terminated"
                );
                return Err(WorkerError::timeout(deadline));
            }
        };

        if !status.success() {
            warn!(exit_code = ?status.code(), elapsed_ms, "Worker exited unsuccessfully");
            return Err(WorkerError::failed(
                status.code(),
                self.diagnostic(&err, &out),
            ));
        }

        let result = parse_output(&out)?;
        info!(tiers = result.len(), elapsed_ms, "Worker completed");
        Ok(result)
    }
}

async fn write_request<W>(stdin: Option<W>, payload: &[u8]) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    // A worker may exit without reading its input; that is not an I/O failure.
    match stdin.write_all(payload).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(e) => return Err(e),
    }
    match stdin.shutdown().await {
        Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
        _ => Ok(()),
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Parses worker stdout into a [`WorkerResult`].
///
/// The output must be a JSON object whose values are strings (or null,
/// which is skipped). An object carrying a string `error` field is treated
/// as a failure reported by the worker itself.
pub fn parse_output(stdout: &[u8]) -> Result<WorkerResult, WorkerError> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Err(WorkerError::parse("worker produced no output"));
    }

    let value: Value = serde_json::from_str(text).map_err(|e| WorkerError::parse(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(WorkerError::parse("expected a JSON object of tier texts"));
    };

    if let Some(Value::String(message)) = map.get("error") {
        if !message.trim().is_empty() {
            return Err(WorkerError::failed(None, message.trim()));
        }
    }

    let mut tiers = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::String(text) => tiers.push((key, text)),
            Value::Null => {}
            other => {
                return Err(WorkerError::parse(format!(
                    "tier '{key}' is not text (found {})",
                    json_type_name(&other)
                )));
            }
        }
    }
    Ok(tiers.into_iter().collect())
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Returns the last `max_chars` characters of `raw`, without terminal escapes.
///
/// Truncated output is prefixed with `...`.
#[must_use]
pub fn diagnostic_tail(raw: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    let cleaned = ANSI_ESCAPE.replace_all(&text, "");
    let cleaned = cleaned.trim();

    let total = cleaned.chars().count();
    if total <= max_chars {
        return cleaned.to_string();
    }
    let tail: String = cleaned.chars().skip(total - max_chars).collect();
    format!("...{tail}")
}

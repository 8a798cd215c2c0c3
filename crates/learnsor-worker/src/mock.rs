//! Scripted worker for tests and offline use.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use crate::{Worker, WorkerError, WorkerRequest, WorkerResult};

/// A [`Worker`] that replays queued outcomes instead of running a process.
///
/// Queued outcomes are consumed in order. Once the queue is empty every call
/// answers with a single tier keyed by the request's target level, so the
/// worker is usable without any setup.
///
/// Calls can be slowed with [`with_delay`](Self::with_delay) or parked with
/// [`held`](Self::held) until [`release`](Self::release) is called. Both
/// respect the invocation deadline and return [`WorkerError::Timeout`] when
/// it expires first.
#[derive(Debug, Default)]
pub struct ScriptedWorker {
    outcomes: Mutex<VecDeque<Result<WorkerResult, WorkerError>>>,
    calls: Mutex<Vec<WorkerRequest>>,
    delay: Option<Duration>,
    hold: bool,
    released: Notify,
    invoked: Notify,
}

impl ScriptedWorker {
    /// Creates a worker with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply.
    #[must_use]
    pub fn with_reply(self, result: WorkerResult) -> Self {
        self.push(Ok(result));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn with_failure(self, error: WorkerError) -> Self {
        self.push(Err(error));
        self
    }

    /// Delays every call by `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Parks every call until [`release`](Self::release) is called.
    #[must_use]
    pub const fn held(mut self) -> Self {
        self.hold = true;
        self
    }

    /// Queues an outcome on a shared worker.
    pub fn push(&self, outcome: Result<WorkerResult, WorkerError>) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Lets one parked call proceed.
    pub fn release(&self) {
        self.released.notify_one();
    }

    /// Waits until a call has started.
    pub async fn wait_until_invoked(&self) {
        self.invoked.notified().await;
    }

    /// Requests received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<WorkerRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of calls received so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_outcome(&self, request: &WorkerRequest) -> Result<WorkerResult, WorkerError> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Ok(WorkerResult::new().with_tier(
                    request.target_level.clone(),
                    format!("Hint for {}: {}", request.target_level, request.question),
                ))
            })
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn invoke(
        &self,
        request: &WorkerRequest,
        deadline: Duration,
    ) -> Result<WorkerResult, WorkerError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.invoked.notify_one();
        debug!(level = %request.target_level, "Scripted worker invoked");

        let wait = async {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.hold {
                self.released.notified().await;
            }
        };
        if tokio::time::timeout(deadline, wait).await.is_err() {
            return Err(WorkerError::timeout(deadline));
        }

        self.next_outcome(request)
    }
}

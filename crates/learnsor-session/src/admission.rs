//! Single-flight admission.
//!
//! At most one worker invocation may be outstanding per controller. The gate
//! is a one-permit semaphore; the permit is an owned token that travels with
//! the request and frees the gate when dropped, whatever the outcome.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Gate admitting one in-flight request at a time.
#[derive(Debug, Clone)]
pub struct RequestAdmission {
    gate: Arc<Semaphore>,
}

impl Default for RequestAdmission {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestAdmission {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// Takes the gate if it is free; never waits.
    #[must_use]
    pub fn try_admit(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.gate)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// Returns `true` while a request holds the gate.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.gate.available_permits() == 0
    }
}

/// Proof of admission. The gate reopens when this is dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

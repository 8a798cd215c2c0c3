//! Reachability and dwell-time checks.
//!
//! These are pure functions of the session state and the current time; the
//! controller runs them after the admission and level lookup checks.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::DisclosureError;
use crate::session::SessionState;

/// How an admissible level request relates to the session's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGrant {
    /// A level below the current one. Serving it changes nothing.
    Revisit,
    /// The current level. Serving it refreshes its timestamp.
    Current,
    /// The level right after the current one, whose dwell time has elapsed.
    Advance,
}

/// Whole seconds left before `dwell` has passed since `served_at`, rounded up.
///
/// Returns 0 once the dwell time has elapsed. A `served_at` in the future is
/// treated as no time elapsed.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use learnsor_session::access::remaining_wait_secs;
///
/// let served = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
/// let now = served + chrono::Duration::milliseconds(59_001);
/// assert_eq!(remaining_wait_secs(now, served, Duration::from_secs(60)), 1);
/// ```
#[must_use]
pub fn remaining_wait_secs(now: DateTime<Utc>, served_at: DateTime<Utc>, dwell: Duration) -> u64 {
    let elapsed_ms = u64::try_from(now.signed_duration_since(served_at).num_milliseconds()).unwrap_or(0);
    let dwell_ms = u64::try_from(dwell.as_millis()).unwrap_or(u64::MAX);
    dwell_ms.saturating_sub(elapsed_ms).div_ceil(1000)
}

/// Decides whether level `requested_index` may be served now.
///
/// Levels at or below the current index always pass. The next level passes
/// only once the current level has been served and its dwell time has
/// elapsed. Anything further ahead is out of order.
pub fn check_level_access(
    state: &SessionState,
    requested_index: usize,
    level_id: &str,
    now: DateTime<Utc>,
    dwell: Duration,
) -> Result<AccessGrant, DisclosureError> {
    let current = state.current_level_index();

    if requested_index < current {
        return Ok(AccessGrant::Revisit);
    }
    if requested_index == current {
        return Ok(AccessGrant::Current);
    }
    if requested_index > current + 1 {
        return Err(DisclosureError::out_of_order(level_id));
    }

    let Some(served_at) = state.unlock_timestamp(current) else {
        return Err(DisclosureError::out_of_order(level_id));
    };

    match remaining_wait_secs(now, served_at, dwell) {
        0 => Ok(AccessGrant::Advance),
        remaining => Err(DisclosureError::too_soon(level_id, remaining)),
    }
}

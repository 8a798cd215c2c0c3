//! Maps worker output to the text of one level.

use learnsor_worker::WorkerResult;

use crate::levels::{Level, LevelRegistry};

/// Text returned when the worker produced nothing usable.
pub const PLACEHOLDER_TEXT: &str = "No hint content was returned for this level.";

/// Picks the text to show for `level` from a worker result.
///
/// Preference order:
/// 1. the level's own tier keys, in order;
/// 2. the first non-empty tier belonging to any level, in registry order;
/// 3. any other non-empty tier;
/// 4. [`PLACEHOLDER_TEXT`].
#[must_use]
pub fn extract_tier(result: &WorkerResult, level: &Level, registry: &LevelRegistry) -> String {
    let own = level.tier_keys.iter().find_map(|key| result.tier(key));

    let known = || {
        registry
            .iter()
            .flat_map(|l| l.tier_keys.iter())
            .find_map(|key| result.tier(key))
    };

    let any = || result.non_empty_tiers().map(|(_, text)| text).next();

    own.or_else(known)
        .or_else(any)
        .map_or_else(|| PLACEHOLDER_TEXT.to_string(), |text| text.trim().to_string())
}

//! Level registry.
//!
//! Levels are the ordered disclosure tiers a learner moves through. The
//! registry is fixed at startup and never changes while the controller runs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{LearnsorError, Result};

/// A single disclosure tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    /// Stable identifier used in requests.
    pub id: String,
    /// Heading shown with the level's response.
    pub title: String,
    /// Short description of what the level reveals.
    #[serde(default)]
    pub description: String,
    /// Worker tier keys that carry this level's text, in preference order.
    pub tier_keys: Vec<String>,
}

impl Level {
    /// Creates a level.
    #[must_use]
    pub fn new<I, S>(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>, tier_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            tier_keys: tier_keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// The three tiers used when no levels are configured.
#[must_use]
pub fn default_levels() -> Vec<Level> {
    vec![
        Level::new(
            "concept",
            "Concept & Why",
            "The idea behind the code and why it works the way it does.",
            ["concept", "logical"],
        ),
        Level::new(
            "how",
            "How To Approach It",
            "Implementation hints: the steps and functions to reach for.",
            ["how", "functions"],
        ),
        Level::new(
            "code",
            "Code",
            "A runnable snippet that answers the question.",
            ["code", "snippet"],
        ),
    ]
}

/// Ordered, immutable set of levels.
///
/// # Examples
///
/// ```
/// use learnsor_session::LevelRegistry;
///
/// let registry = LevelRegistry::default();
/// assert_eq!(registry.level_count(), 3);
/// assert_eq!(registry.level_index_of("how"), Some(1));
/// assert_eq!(registry.level_index_of("expert"), None);
/// assert_eq!(registry.level_at(2).map(|l| l.id.as_str()), Some("code"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LevelRegistry {
    levels: Vec<Level>,
}

impl Default for LevelRegistry {
    fn default() -> Self {
        Self {
            levels: default_levels(),
        }
    }
}

impl LevelRegistry {
    /// Builds a registry from an ordered list of levels.
    ///
    /// # Errors
    ///
    /// Returns `LearnsorError::InvalidLevels` if the list is empty, an id is
    /// blank or repeated, or a level names no tier keys.
    pub fn new(levels: Vec<Level>) -> Result<Self> {
        validate_levels(&levels)?;
        Ok(Self { levels })
    }

    /// Position of the level with `id`, or `None` if it is not registered.
    #[must_use]
    pub fn level_index_of(&self, id: &str) -> Option<usize> {
        self.levels.iter().position(|level| level.id == id)
    }

    /// The level at `index`.
    #[must_use]
    pub fn level_at(&self, index: usize) -> Option<&Level> {
        self.levels.get(index)
    }

    /// Number of levels.
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Returns `true` if `index` is the final level.
    #[must_use]
    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.levels.len()
    }

    /// Iterates over the levels in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Level> {
        self.levels.iter()
    }
}

impl<'a> IntoIterator for &'a LevelRegistry {
    type Item = &'a Level;
    type IntoIter = std::slice::Iter<'a, Level>;

    fn into_iter(self) -> Self::IntoIter {
        self.levels.iter()
    }
}

/// Checks that a list of levels can form a registry.
pub(crate) fn validate_levels(levels: &[Level]) -> Result<()> {
    if levels.is_empty() {
        return Err(LearnsorError::invalid_levels("at least one level is required"));
    }

    let mut seen = HashSet::new();
    for (index, level) in levels.iter().enumerate() {
        if level.id.trim().is_empty() {
            return Err(LearnsorError::invalid_levels(format!(
                "level at position {index} has an empty id"
            )));
        }
        if !seen.insert(level.id.as_str()) {
            return Err(LearnsorError::invalid_levels(format!(
                "level id '{}' is used more than once",
                level.id
            )));
        }
        if level.tier_keys.iter().all(|key| key.trim().is_empty()) {
            return Err(LearnsorError::invalid_levels(format!(
                "level '{}' must name at least one tier key",
                level.id
            )));
        }
    }
    Ok(())
}

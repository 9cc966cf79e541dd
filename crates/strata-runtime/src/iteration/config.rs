//! Batching configuration.

use std::collections::BTreeSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::table::AnnotationMergeMode;

/// How rows from different input slots are combined into steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IterationStrategy {
    /// Row `i` of every slot forms step `i`; row counts must agree.
    #[default]
    SingleRow,
    /// Rows with equal match-key values form a step, one row per slot.
    AnnotationMerge,
    /// Rows with equal match-key values form a step, any number per slot.
    MergingMany,
    /// Every row of every slot is its own step.
    SplitAll,
    /// All rows of all slots form a single step.
    CollectAll,
}

/// Selection of annotation keys used for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "keys", rename_all = "snake_case")]
pub enum MatchKeys {
    /// An explicit key set.
    Custom(BTreeSet<String>),
    /// Every key present in any input slot.
    Union,
    /// Keys present in every non-empty input slot.
    #[default]
    Intersection,
}

impl MatchKeys {
    /// Creates an explicit key selection.
    pub fn custom<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Custom(keys.into_iter().map(Into::into).collect())
    }
}

/// Per-node batching configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationConfig {
    /// Matching strategy.
    #[serde(default)]
    pub strategy: IterationStrategy,
    /// Keys used by the annotation-matching strategies.
    #[serde(default)]
    pub match_keys: MatchKeys,
    /// Whether steps lacking rows in a required slot are kept.
    ///
    /// `None` defers to the engine-wide default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_incomplete: Option<bool>,
    /// How annotations of a step's rows are merged.
    #[serde(default)]
    pub merge_mode: AnnotationMergeMode,
    /// Restricts execution to the generated steps in this index range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<Range<usize>>,
}

impl IterationConfig {
    /// Creates a configuration for the given strategy.
    pub fn new(strategy: IterationStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Sets the match keys.
    #[must_use]
    pub fn with_match_keys(mut self, match_keys: MatchKeys) -> Self {
        self.match_keys = match_keys;
        self
    }

    /// Overrides the engine-wide incomplete-step policy.
    #[must_use]
    pub fn with_allow_incomplete(mut self, allow: bool) -> Self {
        self.allow_incomplete = Some(allow);
        self
    }

    /// Sets the annotation merge mode.
    #[must_use]
    pub fn with_merge_mode(mut self, mode: AnnotationMergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    /// Restricts execution to a range of step indices.
    #[must_use]
    pub fn with_limit(mut self, limit: Range<usize>) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde() {
        let config = IterationConfig::new(IterationStrategy::MergingMany)
            .with_match_keys(MatchKeys::custom(["sample"]))
            .with_allow_incomplete(true);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["strategy"], "merging_many");
        assert_eq!(json["match_keys"]["type"], "custom");

        let parsed: IterationConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);

        let defaults: IterationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, IterationConfig::default());
    }
}

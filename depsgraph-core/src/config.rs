//! Graph Configuration
//!
//! Per-graph settings. Every graph owns a copy of its configuration, so two
//! scopes of the same session may run with different policies (for example
//! a strict graph in tests next to the permissive interactive one).

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What to do when a relation is requested against a node that is not part
/// of the graph being built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTargetPolicy {
    /// Log a warning and drop the single relation. The rebuild continues.
    #[default]
    Log,

    /// Drop the relation and fail the rebuild with
    /// [`DepsgraphError::MissingTarget`](crate::error::DepsgraphError::MissingTarget).
    Fail,
}

/// Settings that control construction and evaluation of one graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Policy for relations whose target cannot be located.
    pub missing_target: MissingTargetPolicy,

    /// Number of threads of a dedicated evaluation pool. `None` runs
    /// operation bodies on the global rayon pool.
    pub worker_threads: Option<usize>,

    /// Emit a trace event for every relation added during a rebuild.
    pub log_relations: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            missing_target: MissingTargetPolicy::Log,
            worker_threads: None,
            log_relations: false,
        }
    }
}

impl GraphConfig {
    /// Configuration that turns every missing relation target into an error.
    pub fn strict() -> Self {
        Self {
            missing_target: MissingTargetPolicy::Fail,
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_permissive() {
        let config = GraphConfig::default();
        assert_eq!(config.missing_target, MissingTargetPolicy::Log);
        assert_eq!(config.worker_threads, None);
    }

    #[test]
    fn parses_partial_json() {
        let config = GraphConfig::from_json(r#"{ "missing_target": "fail" }"#).unwrap();
        assert_eq!(config.missing_target, MissingTargetPolicy::Fail);
        assert!(!config.log_relations);
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(GraphConfig::from_json(r#"{ "missing_target": "explode" }"#).is_err());
    }
}

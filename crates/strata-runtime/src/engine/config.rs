//! Engine configuration.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// What happens to the remaining steps of a node once one of them fails.
///
/// Either way the node ends `Failed` and its descendants are skipped, while
/// independent branches keep running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailurePolicy {
    /// Steps not yet started are left unstarted.
    #[default]
    AbortOnFirstFailure,
    /// Every step runs and all errors are reported.
    CollectAll,
}

/// Configuration for the pipeline execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of steps executing at once, across all nodes.
    #[builder(default = "default_worker_pool_size()")]
    pub worker_pool_size: usize,

    /// Whether steps missing rows in a required slot are kept.
    ///
    /// Nodes may override this in their iteration configuration.
    #[builder(default = "false")]
    pub allow_incomplete: bool,

    /// Reaction to step failures.
    #[builder(default)]
    pub failure_policy: FailurePolicy,
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.worker_pool_size
            && size == 0
        {
            return Err("worker_pool_size must be at least 1".into());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Returns a builder for creating an engine configuration.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Returns a configuration that runs one step at a time.
    pub fn sequential() -> Self {
        Self {
            worker_pool_size: 1,
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            allow_incomplete: false,
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get())
}

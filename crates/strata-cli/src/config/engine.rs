//! Engine configuration arguments.

use anyhow::Context;
use clap::Args;
use strata_runtime::engine::{EngineConfig, FailurePolicy};

/// Engine options.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Worker pool size; 1 runs everything sequentially.
    ///
    /// Defaults to the number of available CPUs.
    #[arg(long, env = "STRATA_WORKERS")]
    pub workers: Option<usize>,

    /// Keep iteration steps that lack rows in a required slot.
    #[arg(long, env = "STRATA_ALLOW_INCOMPLETE")]
    pub allow_incomplete: bool,

    /// Run every step of a failing node instead of stopping at the first failure.
    #[arg(long, env = "STRATA_COLLECT_ERRORS")]
    pub collect_errors: bool,
}

impl EngineArgs {
    /// Builds the validated engine configuration.
    pub fn to_config(&self) -> anyhow::Result<EngineConfig> {
        let mut builder = EngineConfig::builder();
        builder.allow_incomplete(self.allow_incomplete);
        builder.failure_policy(if self.collect_errors {
            FailurePolicy::CollectAll
        } else {
            FailurePolicy::AbortOnFirstFailure
        });
        if let Some(workers) = self.workers {
            builder.worker_pool_size(workers);
        }
        builder.build().context("invalid engine configuration")
    }
}

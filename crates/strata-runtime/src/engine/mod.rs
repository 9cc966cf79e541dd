//! Pipeline execution engine.
//!
//! This module provides the runtime for executing pipeline graphs:
//! - [`Engine`]: Schedules nodes and steps on a bounded worker pool
//! - [`EngineConfig`]: Configuration options
//! - [`Progress`], [`ProgressSink`]: Hierarchical progress reporting
//! - [`RunReport`]: Terminal states, errors and timing of a run

mod config;
mod executor;
mod progress;
mod report;
mod timing;

pub use config::{EngineConfig, EngineConfigBuilder, EngineConfigBuilderError, FailurePolicy};
pub use executor::Engine;
pub use progress::{NoopProgress, Progress, ProgressEvent, ProgressSink, TracingProgress};
pub use report::{NodeReport, NodeState, RunError, RunReport, RunState, StepState};
pub use timing::Timing;

//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types for ergonomic imports:
//!
//! ```rust
//! use strata_runtime::prelude::*;
//! ```

pub use tokio_util::sync::CancellationToken;

pub use crate::cache::{Cache, CacheConfig, FsStorage, MemoryStorage, Storage};
pub use crate::engine::{
    Engine, EngineConfig, EngineConfigBuilder, FailurePolicy, NodeState, Progress, ProgressSink,
    RunReport, RunState, StepState,
};
pub use crate::error::{ErrorKind, RuntimeError, RuntimeResult};
pub use crate::graph::{DataKind, NodeId, PipelineGraph, SlotDeclaration, SlotRef, SlotSpec};
pub use crate::iteration::{
    IterationConfig, IterationStep, IterationStrategy, MatchKeys,
};
pub use crate::node::{
    NodeError, NodeLogic, NodeRegistry, NodeResult, StepContext, StepOutput,
};
pub use crate::table::{AnnotationMergeMode, AnnotationSet, DataItem, DataTable, Row};

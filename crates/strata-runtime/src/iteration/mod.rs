//! Iteration step generation.
//!
//! A node's populated input slots are turned into [`IterationStep`]s, the
//! units of work dispatched to the worker pool:
//! - [`IterationStrategy`]: How rows of different slots are matched
//! - [`MatchKeys`]: Which annotation keys take part in matching
//! - [`IterationConfig`]: Per-node batching configuration
//! - [`IterationStepGenerator`]: Produces the ordered step list

mod config;
mod generator;
mod step;

pub use config::{IterationConfig, IterationStrategy, MatchKeys};
pub use generator::{IterationStepGenerator, SlotInput};
pub use step::{IterationStep, StepSlot};

//! Node logic.
//!
//! Everything a node implementation interacts with:
//! - [`NodeLogic`]: The trait implemented by node types
//! - [`StepContext`]: Per-step services (progress, cancellation, payloads)
//! - [`StepOutput`]: Rows produced by one step, per output slot
//! - [`NodeRegistry`]: Node types instantiated by name

mod context;
mod error;
mod logic;
mod output;
mod registry;

pub use context::StepContext;
pub use error::{NodeError, NodeResult};
pub use logic::NodeLogic;
pub use output::StepOutput;
pub use registry::{NodeFactory, NodeRegistry};

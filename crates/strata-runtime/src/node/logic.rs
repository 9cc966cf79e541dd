//! Node logic trait.

use async_trait::async_trait;

use super::{NodeResult, StepContext, StepOutput};
use crate::graph::SlotDeclaration;
use crate::iteration::{IterationConfig, IterationStep};

/// Behavior of a node type.
///
/// The engine calls [`execute`](Self::execute) once per iteration step.
/// Implementations must not keep state between steps: steps of a node may
/// run concurrently when [`supports_parallel_batches`](Self::supports_parallel_batches)
/// returns `true`, and cached results are reused whenever the
/// [`fingerprint`](Self::fingerprint) is unchanged.
#[async_trait]
pub trait NodeLogic: Send + Sync + 'static {
    /// Returns the registered type name, e.g. `"image:threshold"`.
    fn node_type(&self) -> &str;

    /// Declares the input and output slots.
    fn declare_slots(&self) -> SlotDeclaration;

    /// Returns whether steps of this node may run concurrently.
    fn supports_parallel_batches(&self) -> bool {
        false
    }

    /// Returns bytes that change whenever the node's parameters change.
    fn fingerprint(&self) -> Vec<u8>;

    /// Returns the default batching configuration.
    fn iteration_config(&self) -> IterationConfig {
        IterationConfig::default()
    }

    /// Processes one iteration step.
    async fn execute(&self, step: &IterationStep, ctx: &StepContext) -> NodeResult<StepOutput>;
}

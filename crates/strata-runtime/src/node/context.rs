//! Per-step execution context.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::Storage;
use crate::engine::Progress;
use crate::error::RuntimeResult;
use crate::graph::NodeId;
use crate::table::{DataItem, Row};

/// Services available to node logic while executing one step.
#[derive(Clone)]
pub struct StepContext {
    node_id: NodeId,
    step_index: usize,
    progress: Progress,
    storage: Arc<dyn Storage>,
    cancel: CancellationToken,
}

impl StepContext {
    /// Creates a context for one step.
    pub fn new(
        node_id: NodeId,
        step_index: usize,
        progress: Progress,
        storage: Arc<dyn Storage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_id,
            step_index,
            progress,
            storage,
            cancel,
        }
    }

    /// Returns the executing node.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the index of the step within the node's run.
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Returns the progress handle of this step.
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Returns the payload storage.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Returns the run's cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns whether the run was cancelled.
    ///
    /// Long-running steps should check this periodically and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the payload of a row, reloading it if it was evicted.
    pub async fn item(&self, row: &Row) -> RuntimeResult<Arc<DataItem>> {
        row.resolve(self.storage.as_ref()).await
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("node_id", &self.node_id)
            .field("step_index", &self.step_index)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

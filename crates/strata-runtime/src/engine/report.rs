//! Run reports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use super::Timing;
use crate::error::{ErrorKind, RuntimeError};
use crate::graph::{GraphNode, NodeId, RunId};
use crate::table::DataTable;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Lifecycle of a node within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeState {
    /// Upstream nodes have not completed yet.
    #[default]
    Waiting,
    /// All upstream outputs are available.
    Ready,
    Executing,
    Completed,
    Failed,
    /// Cancellation stopped the node before or while it ran.
    Cancelled,
    /// An upstream node failed or the run was aborted.
    Skipped,
}

impl NodeState {
    /// Returns whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }
}

/// Outcome of one iteration step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepState {
    #[default]
    NotStarted,
    Completed,
    Failed,
}

/// An error recorded in a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// Node the error belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Failing step, if the error is step-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    /// Error category.
    pub kind: ErrorKind,
    /// Rendered error message.
    pub message: String,
}

impl RunError {
    /// Records a runtime error.
    pub fn new(error: &RuntimeError) -> Self {
        let (node_id, step) = match error {
            RuntimeError::NodeExecution { node_id, step, .. } => (Some(*node_id), *step),
            _ => (None, None),
        };
        Self {
            node_id,
            step,
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Records a runtime error attributed to a node.
    pub fn for_node(node_id: NodeId, error: &RuntimeError) -> Self {
        Self {
            node_id: Some(node_id),
            ..Self::new(error)
        }
    }
}

/// Outcome of one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    /// Node identity.
    pub node_id: NodeId,
    /// Display name.
    pub name: String,
    /// Terminal state.
    pub state: NodeState,
    /// Whether the outputs came from the cache.
    pub cache_hit: bool,
    /// State of every generated step, by step index.
    pub steps: Vec<StepState>,
    /// Errors raised by the node.
    pub errors: Vec<RunError>,
    /// Errors the engine recovered from, such as failed cache reloads.
    pub recovered: Vec<RunError>,
    /// Wall-clock timing, absent for nodes that never started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
    /// Output tables by slot name.
    #[serde(skip)]
    pub outputs: BTreeMap<String, DataTable>,
}

impl NodeReport {
    pub(crate) fn new(node: &GraphNode, state: NodeState) -> Self {
        Self {
            node_id: node.id(),
            name: node.name().to_owned(),
            state,
            cache_hit: false,
            steps: Vec::new(),
            errors: Vec::new(),
            recovered: Vec::new(),
            timing: None,
            outputs: BTreeMap::new(),
        }
    }

    /// Returns the table produced for an output slot.
    pub fn output(&self, slot: &str) -> Option<&DataTable> {
        self.outputs.get(slot)
    }

    /// Returns the number of steps in the given state.
    pub fn steps_in(&self, state: StepState) -> usize {
        self.steps.iter().filter(|s| **s == state).count()
    }
}

/// Outcome of a run.
///
/// Every error raised during the run appears in [`errors`](Self::errors);
/// node errors are also listed on their node.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identity.
    pub run_id: RunId,
    /// Terminal run state.
    pub state: RunState,
    /// Node outcomes in execution order.
    pub nodes: Vec<NodeReport>,
    /// All errors of the run.
    pub errors: Vec<RunError>,
    /// Errors recovered by recomputation.
    pub recovered: Vec<RunError>,
    /// Wall-clock timing of the run.
    pub timing: Timing,
}

impl RunReport {
    /// Returns the terminal run state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Returns whether the run completed without errors.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Returns the report of a node.
    pub fn node(&self, node_id: NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }

    /// Returns the state of a node.
    pub fn node_state(&self, node_id: NodeId) -> Option<NodeState> {
        self.node(node_id).map(|node| node.state)
    }

    /// Returns the table produced for a node's output slot.
    pub fn output(&self, node_id: NodeId, slot: &str) -> Option<&DataTable> {
        self.node(node_id)?.output(slot)
    }

    /// Returns the errors of one kind.
    pub fn errors_of_kind(&self, kind: ErrorKind) -> impl Iterator<Item = &RunError> {
        self.errors.iter().filter(move |error| error.kind == kind)
    }

    /// Returns the number of nodes served from the cache.
    pub fn cache_hits(&self) -> usize {
        self.nodes.iter().filter(|node| node.cache_hit).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeError;

    #[test]
    fn test_run_error_from_node_failure() {
        let node_id = NodeId::new();
        let error = RuntimeError::NodeExecution {
            node_id,
            step: Some(2),
            source: NodeError::new("boom"),
        };
        let recorded = RunError::new(&error);
        assert_eq!(recorded.node_id, Some(node_id));
        assert_eq!(recorded.step, Some(2));
        assert_eq!(recorded.kind, ErrorKind::NodeExecution);

        let json = serde_json::to_value(&recorded).unwrap();
        assert_eq!(json["kind"], "node_execution");
    }

    #[test]
    fn test_graph_error_attributed_to_node() {
        let node_id = NodeId::new();
        let recorded = RunError::for_node(
            node_id,
            &RuntimeError::ShapeMismatch {
                slot: "mask".into(),
                expected: 2,
                found: 1,
            },
        );
        assert_eq!(recorded.node_id, Some(node_id));
        assert_eq!(recorded.step, None);
        assert!(NodeState::Skipped.is_terminal());
        assert!(!NodeState::Ready.is_terminal());
    }
}

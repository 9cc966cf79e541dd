//! Runtime error types.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, IntoStaticStr};
use thiserror::Error;

use crate::graph::NodeId;
use crate::node::NodeError;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Categories of runtime errors, as they appear in a run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, IntoStaticStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The graph structure is invalid.
    Graph,
    /// An edge would have introduced a cycle.
    Cycle,
    /// Input tables could not be batched.
    ShapeMismatch,
    /// A node's logic failed.
    NodeExecution,
    /// A cached payload could not be persisted or reloaded.
    CacheIo,
    /// Execution stopped cooperatively.
    Cancelled,
    /// Invalid engine or node configuration.
    Configuration,
}

/// Errors that can occur while building or running a pipeline graph.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Connecting two nodes would create a cycle.
    #[error("connecting {from} to {to} would create a cycle")]
    Cycle {
        /// Source node of the rejected edge.
        from: NodeId,
        /// Destination node of the rejected edge.
        to: NodeId,
    },

    /// Graph structure is invalid.
    #[error("invalid graph: {0}")]
    Graph(String),

    /// Input slots have row counts that cannot be paired.
    #[error("slot '{slot}' has {found} rows, expected {expected}")]
    ShapeMismatch {
        /// Slot whose row count differs.
        slot: String,
        /// Row count of the first paired slot.
        expected: usize,
        /// Row count of the mismatched slot.
        found: usize,
    },

    /// Node logic returned an error or panicked.
    #[error(
        "node {node_id} failed{}: {source}",
        .step.map(|s| format!(" at step {s}")).unwrap_or_default()
    )]
    NodeExecution {
        /// Failing node.
        node_id: NodeId,
        /// Index of the failing step, if the failure is step-scoped.
        step: Option<usize>,
        /// Error reported by the node logic.
        #[source]
        source: NodeError,
    },

    /// Payload persistence or reload failed.
    #[error("cache i/o error: {message}")]
    CacheIo {
        /// Description of the failed operation.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<BoxedError>,
    },

    /// Execution was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl RuntimeError {
    /// Creates a cache i/o error with an underlying source.
    pub fn cache_io(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::CacheIo {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the report category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cycle { .. } => ErrorKind::Cycle,
            Self::Graph(_) => ErrorKind::Graph,
            Self::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Self::NodeExecution { .. } => ErrorKind::NodeExecution,
            Self::CacheIo { .. } => ErrorKind::CacheIo,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Returns whether the error is recovered by recomputing the producing node.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CacheIo { .. })
    }
}

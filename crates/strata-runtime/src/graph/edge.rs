//! Edges between node slots.

use serde::{Deserialize, Serialize};

use super::{NodeId, SlotRef};

/// Edge data stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeData {
    /// Output slot name on the source node.
    pub from_slot: String,
    /// Input slot name on the target node.
    pub to_slot: String,
}

/// A connection from one node's output slot to another node's input slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source output slot.
    pub from: SlotRef,
    /// Destination input slot.
    pub to: SlotRef,
}

impl Edge {
    /// Creates an edge between two slots.
    pub fn new(from: SlotRef, to: SlotRef) -> Self {
        Self { from, to }
    }

    /// Returns the source node.
    pub fn source(&self) -> NodeId {
        self.from.node
    }

    /// Returns the destination node.
    pub fn target(&self) -> NodeId {
        self.to.node
    }
}

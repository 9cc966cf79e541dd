//! Pipeline graph structures.
//!
//! This module provides the graph representation executed by the engine:
//! - [`PipelineGraph`]: Nodes and slot-to-slot edges over a petgraph `DiGraph`
//! - [`GraphNode`]: A node's identity, logic and declared slots
//! - [`NodeId`], [`RunId`]: Unique identifiers
//! - [`SlotSpec`], [`SlotDeclaration`], [`SlotRef`], [`DataKind`]: Typed slots
//! - [`Edge`], [`EdgeData`]: Connections between output and input slots

mod edge;
mod graph;
mod id;
mod slot;

pub use edge::{Edge, EdgeData};
pub use graph::{GraphNode, PipelineGraph};
pub use id::{NodeId, RunId};
pub use slot::{DataKind, SlotDeclaration, SlotDirection, SlotRef, SlotSpec};

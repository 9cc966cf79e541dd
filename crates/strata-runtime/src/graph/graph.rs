//! Pipeline graph runtime representation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};

use super::{Edge, EdgeData, NodeId, SlotDeclaration, SlotRef};
use crate::error::{RuntimeError, RuntimeResult};
use crate::iteration::IterationConfig;
use crate::node::{NodeLogic, NodeRegistry};

/// A node in the pipeline graph.
#[derive(Clone)]
pub struct GraphNode {
    id: NodeId,
    name: Option<String>,
    logic: Arc<dyn NodeLogic>,
    slots: SlotDeclaration,
    iteration: IterationConfig,
}

impl GraphNode {
    /// Returns the node identity.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the display name, falling back to the node type.
    pub fn name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.logic.node_type())
    }

    /// Returns the node logic.
    pub fn logic(&self) -> &Arc<dyn NodeLogic> {
        &self.logic
    }

    /// Returns the slots declared by the node logic when it was added.
    pub fn slots(&self) -> &SlotDeclaration {
        &self.slots
    }

    /// Returns the batching configuration of this node.
    pub fn iteration(&self) -> &IterationConfig {
        &self.iteration
    }
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("node_type", &self.logic.node_type())
            .field("slots", &self.slots)
            .finish()
    }
}

/// A pipeline graph containing nodes and slot-to-slot edges.
///
/// Internally uses petgraph's `DiGraph`. Nodes are never removed, so node
/// indices reflect insertion order, which breaks ties in
/// [`topological_order`](Self::topological_order).
#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    graph: DiGraph<GraphNode, EdgeData>,
    node_indices: HashMap<NodeId, NodeIndex>,
}

impl PipelineGraph {
    /// Creates a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Adds a node with a fresh identity.
    pub fn add_node(&mut self, logic: impl NodeLogic) -> RuntimeResult<NodeId> {
        self.insert_node(NodeId::new(), None, Arc::new(logic))
    }

    /// Adds a named node with a fresh identity.
    pub fn add_named_node(
        &mut self,
        name: impl Into<String>,
        logic: impl NodeLogic,
    ) -> RuntimeResult<NodeId> {
        self.insert_node(NodeId::new(), Some(name.into()), Arc::new(logic))
    }

    /// Adds a node with a caller-provided stable identity.
    ///
    /// Reusing the identity of a previous graph lets the cache serve results
    /// produced by that graph.
    pub fn add_node_with_id(
        &mut self,
        id: NodeId,
        name: Option<String>,
        logic: Arc<dyn NodeLogic>,
    ) -> RuntimeResult<NodeId> {
        self.insert_node(id, name, logic)
    }

    /// Instantiates a registered node type and adds it to the graph.
    pub fn add_registered(
        &mut self,
        registry: &NodeRegistry,
        node_type: &str,
        params: &serde_json::Value,
    ) -> RuntimeResult<NodeId> {
        let logic = registry.create(node_type, params)?;
        self.insert_node(NodeId::new(), None, logic)
    }

    fn insert_node(
        &mut self,
        id: NodeId,
        name: Option<String>,
        logic: Arc<dyn NodeLogic>,
    ) -> RuntimeResult<NodeId> {
        if self.node_indices.contains_key(&id) {
            return Err(RuntimeError::Graph(format!("node {id} already exists")));
        }

        let slots = logic.declare_slots();
        slots
            .validate()
            .map_err(|message| RuntimeError::Graph(format!("node {id}: {message}")))?;

        let node = GraphNode {
            id,
            name,
            iteration: logic.iteration_config(),
            logic,
            slots,
        };
        let index = self.graph.add_node(node);
        self.node_indices.insert(id, index);
        Ok(id)
    }

    /// Overrides the batching configuration of a node.
    pub fn set_iteration_config(
        &mut self,
        id: NodeId,
        config: IterationConfig,
    ) -> RuntimeResult<()> {
        let index = self.index_of(id)?;
        if let Some(node) = self.graph.node_weight_mut(index) {
            node.iteration = config;
        }
        Ok(())
    }

    /// Returns a node by identity.
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        let index = self.node_indices.get(&id)?;
        self.graph.node_weight(*index)
    }

    /// Returns whether a node exists.
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.node_indices.contains_key(&id)
    }

    /// Returns an iterator over all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    /// Connects an output slot to an input slot.
    ///
    /// Fails with [`RuntimeError::Cycle`] if the destination node already
    /// reaches the source node, and with [`RuntimeError::Graph`] if either
    /// slot is undeclared, the kinds are incompatible, or the edge exists.
    pub fn connect(&mut self, from: SlotRef, to: SlotRef) -> RuntimeResult<()> {
        let from_index = self.index_of(from.node)?;
        let to_index = self.index_of(to.node)?;

        let source = &self.graph[from_index];
        let output = source.slots.output(&from.slot).ok_or_else(|| {
            RuntimeError::Graph(format!("node {} has no output slot '{}'", from.node, from.slot))
        })?;
        let target = &self.graph[to_index];
        let input = target.slots.input(&to.slot).ok_or_else(|| {
            RuntimeError::Graph(format!("node {} has no input slot '{}'", to.node, to.slot))
        })?;

        if !output.kind.is_compatible_with(&input.kind) {
            return Err(RuntimeError::Graph(format!(
                "cannot connect {from} ({}) to {to} ({})",
                output.kind, input.kind
            )));
        }

        let duplicate = self
            .graph
            .edges_connecting(from_index, to_index)
            .any(|edge| edge.weight().from_slot == from.slot && edge.weight().to_slot == to.slot);
        if duplicate {
            return Err(RuntimeError::Graph(format!(
                "edge {from} -> {to} already exists"
            )));
        }

        // A path back from the destination to the source closes a cycle,
        // which includes the self-loop case.
        if has_path_connecting(&self.graph, to_index, from_index, None) {
            return Err(RuntimeError::Cycle {
                from: from.node,
                to: to.node,
            });
        }

        self.graph.add_edge(
            from_index,
            to_index,
            EdgeData {
                from_slot: from.slot,
                to_slot: to.slot,
            },
        );
        Ok(())
    }

    /// Returns an iterator over all edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.graph.edge_references().map(|edge| self.to_edge(edge))
    }

    /// Returns the edges feeding a node, in insertion order.
    pub fn incoming_edges(&self, id: NodeId) -> Vec<Edge> {
        self.edges_of(id, Direction::Incoming)
    }

    /// Returns the edges leaving a node, in insertion order.
    pub fn outgoing_edges(&self, id: NodeId) -> Vec<Edge> {
        self.edges_of(id, Direction::Outgoing)
    }

    fn edges_of(&self, id: NodeId, direction: Direction) -> Vec<Edge> {
        let Some(index) = self.node_indices.get(&id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(*index, direction).collect();
        edges.sort_by_key(|edge| edge.id());
        edges.into_iter().map(|edge| self.to_edge(edge)).collect()
    }

    fn to_edge(&self, edge: petgraph::graph::EdgeReference<'_, EdgeData>) -> Edge {
        let data = edge.weight();
        Edge {
            from: SlotRef::new(self.graph[edge.source()].id, data.from_slot.clone()),
            to: SlotRef::new(self.graph[edge.target()].id, data.to_slot.clone()),
        }
    }

    /// Returns the distinct direct upstream nodes, in insertion order.
    pub fn upstream(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Returns the distinct direct downstream nodes, in insertion order.
    pub fn downstream(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(index) = self.node_indices.get(&id) else {
            return Vec::new();
        };
        let mut indices: Vec<_> = self.graph.neighbors_directed(*index, direction).collect();
        indices.sort();
        indices.dedup();
        indices.into_iter().map(|i| self.graph[i].id).collect()
    }

    /// Returns every node transitively downstream of `id`, excluding `id`.
    pub fn descendants(&self, id: NodeId) -> HashSet<NodeId> {
        let mut result = HashSet::new();
        let Some(start) = self.node_indices.get(&id) else {
            return result;
        };
        let mut bfs = Bfs::new(&self.graph, *start);
        while let Some(index) = bfs.next(&self.graph) {
            if index != *start {
                result.insert(self.graph[index].id);
            }
        }
        result
    }

    /// Returns nodes in topological order.
    ///
    /// Uses Kahn's algorithm with a min-heap over insertion indices, so the
    /// order is deterministic and ties go to the earlier inserted node.
    pub fn topological_order(&self) -> RuntimeResult<Vec<NodeId>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| self.graph.edges_directed(index, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|index| in_degree[index.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(self.graph[index].id);
            for edge in self.graph.edges_directed(index, Direction::Outgoing) {
                let target = edge.target();
                in_degree[target.index()] -= 1;
                if in_degree[target.index()] == 0 {
                    ready.push(Reverse(target));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(RuntimeError::Graph(
                "cycle detected in pipeline graph".into(),
            ));
        }
        Ok(order)
    }

    /// Returns a reference to the underlying petgraph.
    pub fn inner(&self) -> &DiGraph<GraphNode, EdgeData> {
        &self.graph
    }

    fn index_of(&self, id: NodeId) -> RuntimeResult<NodeIndex> {
        self.node_indices
            .get(&id)
            .copied()
            .ok_or_else(|| RuntimeError::Graph(format!("node {id} does not exist")))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::ErrorKind;
    use crate::graph::DataKind;
    use crate::iteration::IterationStep;
    use crate::node::{NodeResult, StepContext, StepOutput};

    #[derive(Debug)]
    struct Passthrough;

    #[async_trait]
    impl NodeLogic for Passthrough {
        fn node_type(&self) -> &str {
            "test:passthrough"
        }

        fn declare_slots(&self) -> SlotDeclaration {
            SlotDeclaration::new()
                .with_optional_input("in", DataKind::any())
                .with_output("out", DataKind::any())
        }

        fn fingerprint(&self) -> Vec<u8> {
            Vec::new()
        }

        async fn execute(&self, _: &IterationStep, _: &StepContext) -> NodeResult<StepOutput> {
            Ok(StepOutput::new())
        }
    }

    fn link(graph: &mut PipelineGraph, from: NodeId, to: NodeId) -> RuntimeResult<()> {
        graph.connect(SlotRef::new(from, "out"), SlotRef::new(to, "in"))
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let mut graph = PipelineGraph::new();
        let a = graph.add_node(Passthrough).unwrap();
        let b = graph.add_node(Passthrough).unwrap();
        let c = graph.add_node(Passthrough).unwrap();
        let d = graph.add_node(Passthrough).unwrap();
        link(&mut graph, c, a).unwrap();
        link(&mut graph, a, d).unwrap();
        link(&mut graph, b, d).unwrap();

        let order = graph.topological_order().unwrap();
        let position = |id| order.iter().position(|n| *n == id).unwrap();
        assert!(position(c) < position(a));
        assert!(position(a) < position(d));
        assert!(position(b) < position(d));
        // Ties are broken by insertion order.
        assert_eq!(order, vec![b, c, a, d]);
        assert_eq!(graph.topological_order().unwrap(), order);
    }

    #[test]
    fn test_connect_rejects_cycles() {
        let mut graph = PipelineGraph::new();
        let a = graph.add_node(Passthrough).unwrap();
        let b = graph.add_node(Passthrough).unwrap();
        let c = graph.add_node(Passthrough).unwrap();
        link(&mut graph, a, b).unwrap();
        link(&mut graph, b, c).unwrap();

        let error = link(&mut graph, c, a).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Cycle);
        let error = link(&mut graph, a, a).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Cycle);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_connect_validates_slots() {
        let mut graph = PipelineGraph::new();
        let a = graph.add_node(Passthrough).unwrap();
        let b = graph.add_node(Passthrough).unwrap();

        let error = graph
            .connect(SlotRef::new(a, "missing"), SlotRef::new(b, "in"))
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Graph);

        link(&mut graph, a, b).unwrap();
        assert_eq!(link(&mut graph, a, b).unwrap_err().kind(), ErrorKind::Graph);
    }

    #[test]
    fn test_neighbors_and_descendants() {
        let mut graph = PipelineGraph::new();
        let a = graph.add_node(Passthrough).unwrap();
        let b = graph.add_node(Passthrough).unwrap();
        let c = graph.add_node(Passthrough).unwrap();
        let sibling = graph.add_node(Passthrough).unwrap();
        link(&mut graph, a, b).unwrap();
        link(&mut graph, b, c).unwrap();
        link(&mut graph, a, sibling).unwrap();

        assert_eq!(graph.downstream(a), vec![b, sibling]);
        assert_eq!(graph.upstream(c), vec![b]);
        let descendants = graph.descendants(b);
        assert_eq!(descendants.len(), 1);
        assert!(descendants.contains(&c));

        let incoming = graph.incoming_edges(b);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source(), a);
    }
}

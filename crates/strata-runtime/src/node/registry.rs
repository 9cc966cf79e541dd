//! Registry of node types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{NodeError, NodeLogic, NodeResult};
use crate::error::{RuntimeError, RuntimeResult};

/// Creates node logic from JSON parameters.
pub type NodeFactory =
    Arc<dyn Fn(&serde_json::Value) -> NodeResult<Arc<dyn NodeLogic>> + Send + Sync>;

/// Maps node type names to factories.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: BTreeMap<String, NodeFactory>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the type.
    pub fn register<F>(&mut self, node_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> NodeResult<Arc<dyn NodeLogic>> + Send + Sync + 'static,
    {
        self.factories.insert(node_type.into(), Arc::new(factory));
        self
    }

    /// Registers a node type whose parameters deserialize into the logic itself.
    pub fn register_deserializable<T>(&mut self, node_type: impl Into<String>) -> &mut Self
    where
        T: NodeLogic + DeserializeOwned,
    {
        self.register(node_type, |params| {
            let logic: T = serde_json::from_value(params.clone())
                .map_err(|e| NodeError::new(format!("invalid parameters: {e}")).with_source(e))?;
            Ok(Arc::new(logic) as Arc<dyn NodeLogic>)
        })
    }

    /// Instantiates a node type.
    pub fn create(
        &self,
        node_type: &str,
        params: &serde_json::Value,
    ) -> RuntimeResult<Arc<dyn NodeLogic>> {
        let factory = self.factories.get(node_type).ok_or_else(|| {
            RuntimeError::Configuration(format!("unknown node type '{node_type}'"))
        })?;
        factory(params)
            .map_err(|e| RuntimeError::Configuration(format!("cannot create '{node_type}': {e}")))
    }

    /// Returns whether a node type is registered.
    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Returns the registered type names in sorted order.
    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("node_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

//! Typed input and output slots.

use std::fmt;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay};

use super::NodeId;

/// Data-kind tag that types a slot.
///
/// Two slots are compatible when their kinds are equal or either side is
/// [`DataKind::ANY`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataKind(String);

impl DataKind {
    /// Wildcard kind accepted by and assignable to every slot.
    pub const ANY: &'static str = "any";

    /// Creates a data kind from its tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the wildcard kind.
    pub fn any() -> Self {
        Self(Self::ANY.to_owned())
    }

    /// Returns the kind tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether data of this kind can flow into a slot of `input` kind.
    pub fn is_compatible_with(&self, input: &DataKind) -> bool {
        self.0 == Self::ANY || input.0 == Self::ANY || self.0 == input.0
    }
}

impl From<&str> for DataKind {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Direction of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, StrumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SlotDirection {
    /// Receives tables from upstream nodes.
    Input,
    /// Produces a table for downstream nodes.
    Output,
}

/// Declaration of a single named, typed slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    /// Slot name, unique per direction within a node.
    pub name: String,
    /// Data kind carried by the slot.
    pub kind: DataKind,
    /// Slot direction.
    pub direction: SlotDirection,
    /// Optional input slots never make an iteration step incomplete.
    #[serde(default)]
    pub optional: bool,
}

impl SlotSpec {
    /// Declares a required input slot.
    pub fn input(name: impl Into<String>, kind: impl Into<DataKind>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            direction: SlotDirection::Input,
            optional: false,
        }
    }

    /// Declares an output slot.
    pub fn output(name: impl Into<String>, kind: impl Into<DataKind>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            direction: SlotDirection::Output,
            optional: false,
        }
    }

    /// Marks this slot as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Ordered input and output slots of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDeclaration {
    /// Input slots in declaration order.
    pub inputs: Vec<SlotSpec>,
    /// Output slots in declaration order.
    pub outputs: Vec<SlotSpec>,
}

impl SlotDeclaration {
    /// Creates an empty declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required input slot.
    pub fn with_input(mut self, name: impl Into<String>, kind: impl Into<DataKind>) -> Self {
        self.inputs.push(SlotSpec::input(name, kind));
        self
    }

    /// Adds an optional input slot.
    pub fn with_optional_input(
        mut self,
        name: impl Into<String>,
        kind: impl Into<DataKind>,
    ) -> Self {
        self.inputs.push(SlotSpec::input(name, kind).optional());
        self
    }

    /// Adds an output slot.
    pub fn with_output(mut self, name: impl Into<String>, kind: impl Into<DataKind>) -> Self {
        self.outputs.push(SlotSpec::output(name, kind));
        self
    }

    /// Looks up an input slot by name.
    pub fn input(&self, name: &str) -> Option<&SlotSpec> {
        self.inputs.iter().find(|slot| slot.name == name)
    }

    /// Looks up an output slot by name.
    pub fn output(&self, name: &str) -> Option<&SlotSpec> {
        self.outputs.iter().find(|slot| slot.name == name)
    }

    /// Checks that slot names are unique per direction.
    pub(crate) fn validate(&self) -> Result<(), String> {
        for slots in [&self.inputs, &self.outputs] {
            for (i, slot) in slots.iter().enumerate() {
                if slots[..i].iter().any(|other| other.name == slot.name) {
                    return Err(format!(
                        "duplicate {} slot '{}'",
                        slot.direction, slot.name
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Reference to a named slot on a specific node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRef {
    /// Owning node.
    pub node: NodeId,
    /// Slot name.
    pub slot: String,
}

impl SlotRef {
    /// Creates a slot reference.
    pub fn new(node: NodeId, slot: impl Into<String>) -> Self {
        Self {
            node,
            slot: slot.into(),
        }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.slot)
    }
}

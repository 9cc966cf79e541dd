//! Row payloads.

use derive_more::{Deref, From};
use serde::{Deserialize, Serialize};

/// Opaque payload carried by a row.
///
/// The engine never inspects payloads; node logic decides what the JSON
/// value means for its data kind.
#[derive(Debug, Clone, PartialEq, Deref, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataItem(serde_json::Value);

impl DataItem {
    /// Creates a payload from any JSON value.
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self(value.into())
    }

    /// Returns the JSON value.
    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consumes the payload and returns the JSON value.
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

//! Iteration steps.

use crate::table::{AnnotationSet, Row};

/// Rows of one input slot assigned to a step.
#[derive(Debug, Clone)]
pub struct StepSlot {
    /// Input slot name.
    pub name: String,
    /// Indices of the rows within the slot's input table.
    pub indices: Vec<usize>,
    /// The rows themselves, in index order.
    pub rows: Vec<Row>,
}

/// One unit of work for a node.
///
/// Holds zero or more rows for every input slot, in slot declaration
/// order, and the annotations merged from all of them.
#[derive(Debug, Clone)]
pub struct IterationStep {
    index: usize,
    slots: Vec<StepSlot>,
    merged: AnnotationSet,
}

impl IterationStep {
    pub(crate) fn new(index: usize, slots: Vec<StepSlot>, merged: AnnotationSet) -> Self {
        Self {
            index,
            slots,
            merged,
        }
    }

    /// Returns the zero-based index within the node's current run.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// Returns all slots of the step.
    pub fn slots(&self) -> &[StepSlot] {
        &self.slots
    }

    /// Returns the rows assigned to an input slot.
    pub fn inputs(&self, slot: &str) -> &[Row] {
        self.slots
            .iter()
            .find(|s| s.name == slot)
            .map(|s| s.rows.as_slice())
            .unwrap_or_default()
    }

    /// Returns the first row assigned to an input slot.
    pub fn input(&self, slot: &str) -> Option<&Row> {
        self.inputs(slot).first()
    }

    /// Returns the row indices assigned to an input slot.
    pub fn indices(&self, slot: &str) -> &[usize] {
        self.slots
            .iter()
            .find(|s| s.name == slot)
            .map(|s| s.indices.as_slice())
            .unwrap_or_default()
    }

    /// Returns the merged annotations of all rows in the step.
    pub fn merged_annotations(&self) -> &AnnotationSet {
        &self.merged
    }

    /// Returns the total number of rows across all slots.
    pub fn row_count(&self) -> usize {
        self.slots.iter().map(|s| s.rows.len()).sum()
    }

    /// Returns whether any of the given slots has no rows.
    pub fn is_missing_any<'a>(&self, slots: impl IntoIterator<Item = &'a str>) -> bool {
        slots.into_iter().any(|slot| self.inputs(slot).is_empty())
    }
}

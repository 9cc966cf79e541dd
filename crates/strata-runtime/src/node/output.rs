//! Rows produced by one iteration step.

use std::collections::BTreeMap;

use crate::table::{AnnotationSet, DataItem, Row};

/// Rows produced by a step, grouped by output slot.
///
/// The engine appends the step's merged input annotations to every row,
/// with the row's own annotations taking precedence.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    rows: BTreeMap<String, Vec<Row>>,
}

impl StepOutput {
    /// Creates an empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new row to an output slot.
    pub fn push(
        &mut self,
        slot: impl Into<String>,
        item: impl Into<DataItem>,
        annotations: AnnotationSet,
    ) -> &mut Self {
        self.push_row(slot, Row::new(item, annotations))
    }

    /// Appends an existing row, sharing its payload.
    pub fn push_row(&mut self, slot: impl Into<String>, row: Row) -> &mut Self {
        self.rows.entry(slot.into()).or_default().push(row);
        self
    }

    /// Appends a new row and returns the output.
    #[must_use]
    pub fn with(
        mut self,
        slot: impl Into<String>,
        item: impl Into<DataItem>,
        annotations: AnnotationSet,
    ) -> Self {
        self.push(slot, item, annotations);
        self
    }

    /// Returns the rows of one slot.
    pub fn rows(&self, slot: &str) -> &[Row] {
        self.rows.get(slot).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the names of slots that received rows.
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    /// Returns the total number of rows.
    pub fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    /// Returns whether no rows were produced.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the output and returns rows per slot.
    pub fn into_rows(self) -> BTreeMap<String, Vec<Row>> {
        self.rows
    }
}

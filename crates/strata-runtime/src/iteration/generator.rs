//! Iteration step generator.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{IterationConfig, IterationStep, IterationStrategy, MatchKeys, StepSlot};
use crate::error::{RuntimeError, RuntimeResult};
use crate::table::{AnnotationSet, DataTable};

/// Tracing target for iteration step generation.
const TRACING_TARGET: &str = "strata_runtime::iteration";

/// A populated input slot handed to the generator.
#[derive(Debug, Clone)]
pub struct SlotInput {
    /// Slot name.
    pub name: String,
    /// Optional slots never make a step incomplete.
    pub optional: bool,
    /// Rows bound to the slot for this run.
    pub table: DataTable,
}

impl SlotInput {
    /// Creates a required slot input.
    pub fn required(name: impl Into<String>, table: DataTable) -> Self {
        Self {
            name: name.into(),
            optional: false,
            table,
        }
    }

    /// Creates an optional slot input.
    pub fn optional(name: impl Into<String>, table: DataTable) -> Self {
        Self {
            name: name.into(),
            optional: true,
            table,
        }
    }
}

/// Row indices per slot, in slot declaration order.
type Assignment = Vec<Vec<usize>>;

/// Match-key values of a row; empty means the row carries none of the keys.
type GroupKey = BTreeMap<String, String>;

/// A row carrying at least one match key.
#[derive(Debug)]
struct KeyedRow {
    seq: usize,
    key: GroupKey,
    slot: usize,
    row: usize,
}

/// Rows merged under a common set of match-key values.
#[derive(Debug)]
struct MergeGroup {
    signature: GroupKey,
    first: usize,
    assignment: Assignment,
}

impl MergeGroup {
    fn new(row: &KeyedRow, slots: usize) -> Self {
        Self {
            signature: row.key.clone(),
            first: row.seq,
            assignment: vec![Vec::new(); slots],
        }
    }

    /// Returns whether `key` agrees on every key the group already carries.
    fn accepts(&self, key: &GroupKey) -> bool {
        key.iter()
            .all(|(name, value)| self.signature.get(name).is_none_or(|own| own == value))
    }

    fn add(&mut self, row: &KeyedRow) {
        for (name, value) in &row.key {
            self.signature
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        self.first = self.first.min(row.seq);
        self.assignment[row.slot].push(row.row);
    }
}

/// Converts a node's input tables into an ordered list of iteration steps.
#[derive(Debug, Clone)]
pub struct IterationStepGenerator {
    config: IterationConfig,
    allow_incomplete: bool,
}

impl IterationStepGenerator {
    /// Creates a generator.
    ///
    /// `default_allow_incomplete` applies when the configuration does not
    /// set its own policy.
    pub fn new(config: IterationConfig, default_allow_incomplete: bool) -> Self {
        let allow_incomplete = config.allow_incomplete.unwrap_or(default_allow_incomplete);
        Self {
            config,
            allow_incomplete,
        }
    }

    /// Returns whether incomplete steps are emitted.
    pub fn allows_incomplete(&self) -> bool {
        self.allow_incomplete
    }

    /// Generates the steps for the given inputs.
    ///
    /// Nodes without input slots always get exactly one empty step. Steps
    /// are ordered by the first occurrence of their match-key values,
    /// scanning slots in declaration order, and are numbered from zero after
    /// the limit and the incomplete-step policy have been applied.
    pub fn generate(&self, inputs: &[SlotInput]) -> RuntimeResult<Vec<IterationStep>> {
        if inputs.is_empty() {
            return Ok(vec![IterationStep::new(0, Vec::new(), AnnotationSet::new())]);
        }

        let assignments = match self.config.strategy {
            IterationStrategy::SingleRow => Self::single_row(inputs)?,
            IterationStrategy::SplitAll => Self::split_all(inputs),
            IterationStrategy::CollectAll => Self::collect_all(inputs),
            IterationStrategy::AnnotationMerge => self.annotation_merge(inputs, false),
            IterationStrategy::MergingMany => self.annotation_merge(inputs, true),
        };

        let mut assignments: Vec<Assignment> = match &self.config.limit {
            Some(limit) => assignments
                .into_iter()
                .enumerate()
                .filter(|(index, _)| limit.contains(index))
                .map(|(_, assignment)| assignment)
                .collect(),
            None => assignments,
        };

        if !self.allow_incomplete {
            let before = assignments.len();
            assignments.retain(|assignment| !Self::is_incomplete(inputs, assignment));
            let dropped = before - assignments.len();
            if dropped > 0 {
                tracing::warn!(
                    target: TRACING_TARGET,
                    dropped,
                    remaining = assignments.len(),
                    "Dropped incomplete iteration steps"
                );
            }
        }

        let mut steps: Vec<IterationStep> = assignments
            .into_iter()
            .enumerate()
            .map(|(index, assignment)| self.build_step(index, inputs, assignment))
            .collect();
        for (index, step) in steps.iter_mut().enumerate() {
            step.set_index(index);
        }

        tracing::trace!(
            target: TRACING_TARGET,
            strategy = %self.config.strategy,
            slots = inputs.len(),
            steps = steps.len(),
            "Generated iteration steps"
        );
        Ok(steps)
    }

    fn is_incomplete(inputs: &[SlotInput], assignment: &Assignment) -> bool {
        inputs
            .iter()
            .zip(assignment)
            .any(|(input, rows)| !input.optional && rows.is_empty())
    }

    fn build_step(
        &self,
        index: usize,
        inputs: &[SlotInput],
        assignment: Assignment,
    ) -> IterationStep {
        let slots: Vec<StepSlot> = inputs
            .iter()
            .zip(assignment)
            .map(|(input, indices)| StepSlot {
                name: input.name.clone(),
                rows: indices
                    .iter()
                    .filter_map(|i| input.table.row(*i).cloned())
                    .collect(),
                indices,
            })
            .collect();

        let merged = AnnotationSet::merge_all(
            slots
                .iter()
                .flat_map(|slot| slot.rows.iter().map(|row| row.annotations())),
            self.config.merge_mode,
        );
        IterationStep::new(index, slots, merged)
    }

    /// Pairs rows by position. Empty optional slots are left out of the pairing.
    fn single_row(inputs: &[SlotInput]) -> RuntimeResult<Vec<Assignment>> {
        let paired: Vec<&SlotInput> = inputs
            .iter()
            .filter(|input| !(input.optional && input.table.is_empty()))
            .collect();
        let Some(first) = paired.first() else {
            return Ok(Vec::new());
        };

        let expected = first.table.len();
        if let Some(mismatch) = paired.iter().find(|input| input.table.len() != expected) {
            return Err(RuntimeError::ShapeMismatch {
                slot: mismatch.name.clone(),
                expected,
                found: mismatch.table.len(),
            });
        }

        Ok((0..expected)
            .map(|row| {
                inputs
                    .iter()
                    .map(|input| {
                        if input.table.is_empty() {
                            Vec::new()
                        } else {
                            vec![row]
                        }
                    })
                    .collect()
            })
            .collect())
    }

    fn split_all(inputs: &[SlotInput]) -> Vec<Assignment> {
        let mut assignments = Vec::new();
        for (slot, input) in inputs.iter().enumerate() {
            for row in 0..input.table.len() {
                let mut assignment = vec![Vec::new(); inputs.len()];
                assignment[slot].push(row);
                assignments.push(assignment);
            }
        }
        assignments
    }

    fn collect_all(inputs: &[SlotInput]) -> Vec<Assignment> {
        vec![
            inputs
                .iter()
                .map(|input| (0..input.table.len()).collect())
                .collect(),
        ]
    }

    fn resolve_match_keys(&self, inputs: &[SlotInput]) -> BTreeSet<String> {
        match &self.config.match_keys {
            MatchKeys::Custom(keys) => keys.clone(),
            MatchKeys::Union => inputs
                .iter()
                .flat_map(|input| input.table.annotation_keys())
                .collect(),
            MatchKeys::Intersection => {
                let mut keys: Option<BTreeSet<String>> = None;
                for input in inputs.iter().filter(|input| !input.table.is_empty()) {
                    let slot_keys = input.table.annotation_keys();
                    keys = Some(match keys {
                        Some(current) => current.intersection(&slot_keys).cloned().collect(),
                        None => slot_keys,
                    });
                }
                keys.unwrap_or_default()
            }
        }
    }

    /// Groups rows by their match-key values.
    ///
    /// A row joins a group when every match key both carry has the same
    /// value, so rows carrying only some of the keys join each group they
    /// agree with. Rows carrying more keys are grouped first.
    ///
    /// Rows without any match key form the "no annotation" group. That group
    /// stands alone when it is the only one; otherwise its rows join every
    /// other group if incomplete steps are allowed and are dropped if not.
    fn annotation_merge(&self, inputs: &[SlotInput], many: bool) -> Vec<Assignment> {
        let keys = self.resolve_match_keys(inputs);

        let mut keyed: Vec<KeyedRow> = Vec::new();
        let mut unannotated: Assignment = vec![Vec::new(); inputs.len()];

        for (slot, input) in inputs.iter().enumerate() {
            for (row_index, row) in input.table.rows().iter().enumerate() {
                let key: GroupKey = keys
                    .iter()
                    .filter_map(|key| {
                        row.annotation(key)
                            .map(|value| (key.clone(), value.to_owned()))
                    })
                    .collect();

                if key.is_empty() {
                    unannotated[slot].push(row_index);
                    continue;
                }

                keyed.push(KeyedRow {
                    seq: keyed.len(),
                    key,
                    slot,
                    row: row_index,
                });
            }
        }
        keyed.sort_by_key(|row| Reverse(row.key.len()));

        let mut groups: Vec<MergeGroup> = Vec::new();
        let mut complete: HashMap<GroupKey, usize> = HashMap::new();
        for row in &keyed {
            if row.key.len() == keys.len() {
                let index = *complete.entry(row.key.clone()).or_insert_with(|| {
                    groups.push(MergeGroup::new(row, inputs.len()));
                    groups.len() - 1
                });
                groups[index].add(row);
                continue;
            }

            let mut joined = false;
            for group in groups.iter_mut().filter(|group| group.accepts(&row.key)) {
                group.add(row);
                joined = true;
            }
            if !joined {
                let mut group = MergeGroup::new(row, inputs.len());
                group.add(row);
                groups.push(group);
            }
        }
        groups.sort_by_key(|group| group.first);

        let has_unannotated = unannotated.iter().any(|rows| !rows.is_empty());
        let merged: Vec<Assignment> = if groups.is_empty() {
            if has_unannotated {
                vec![unannotated]
            } else {
                Vec::new()
            }
        } else {
            let distribute = has_unannotated && self.allow_incomplete;
            groups
                .into_iter()
                .map(|group| {
                    let mut assignment = group.assignment;
                    for (slot, rows) in assignment.iter_mut().enumerate() {
                        if distribute {
                            rows.extend(&unannotated[slot]);
                        }
                        rows.sort_unstable();
                        rows.dedup();
                    }
                    assignment
                })
                .collect()
        };

        if many {
            return merged;
        }

        merged
            .into_iter()
            .flat_map(|assignment| Self::expand_single(&assignment))
            .collect()
    }

    /// Expands a one-to-many group into one step per row combination.
    ///
    /// Slots without rows stay empty in every combination.
    fn expand_single(assignment: &Assignment) -> Vec<Assignment> {
        let mut combinations: Vec<Assignment> = vec![Vec::new()];
        for rows in assignment {
            if rows.is_empty() {
                for combination in combinations.iter_mut() {
                    combination.push(Vec::new());
                }
                continue;
            }
            combinations = combinations
                .into_iter()
                .flat_map(|combination| {
                    rows.iter().map(move |row| {
                        let mut next = combination.clone();
                        next.push(vec![*row]);
                        next
                    })
                })
                .collect();
        }
        combinations
    }
}

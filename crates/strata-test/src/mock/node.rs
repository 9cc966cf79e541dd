//! Mock node logic for testing.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use strata_runtime::graph::SlotDeclaration;
use strata_runtime::iteration::{IterationConfig, IterationStep};
use strata_runtime::node::{NodeError, NodeLogic, NodeResult, StepContext, StepOutput};
use strata_runtime::table::{AnnotationSet, DataItem};
use tokio_util::sync::CancellationToken;

use super::CallCounter;

/// Data kind produced and consumed by the mock nodes.
const NUMBER: &str = "number";

/// Source node emitting a fixed list of numbers.
#[derive(Debug, Clone)]
pub struct CountingSource {
    rows: Vec<(i64, AnnotationSet)>,
    version: u32,
    calls: CallCounter,
}

impl CountingSource {
    /// Creates a source emitting unannotated numbers.
    pub fn new(values: impl IntoIterator<Item = i64>) -> Self {
        Self::annotated(values.into_iter().map(|v| (v, AnnotationSet::new())))
    }

    /// Creates a source emitting annotated numbers.
    pub fn annotated(rows: impl IntoIterator<Item = (i64, AnnotationSet)>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            version: 0,
            calls: CallCounter::new(),
        }
    }

    /// Sets a parameter that only changes the fingerprint.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Returns the invocation counter.
    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

#[async_trait]
impl NodeLogic for CountingSource {
    fn node_type(&self) -> &str {
        "test:source"
    }

    fn declare_slots(&self) -> SlotDeclaration {
        SlotDeclaration::new().with_output("out", NUMBER)
    }

    fn fingerprint(&self) -> Vec<u8> {
        let mut bytes = self.version.to_le_bytes().to_vec();
        for (value, annotations) in &self.rows {
            bytes.extend(value.to_le_bytes());
            for (key, annotation) in annotations.iter() {
                bytes.extend(key.as_bytes());
                bytes.extend(annotation.as_bytes());
            }
        }
        bytes
    }

    async fn execute(&self, _: &IterationStep, _: &StepContext) -> NodeResult<StepOutput> {
        self.calls.increment();
        let mut output = StepOutput::new();
        for (value, annotations) in &self.rows {
            output.push("out", DataItem::new(*value), annotations.clone());
        }
        Ok(output)
    }
}

/// Adds a constant to every number of its input.
#[derive(Debug, Clone)]
pub struct MapNode {
    offset: i64,
    parallel: bool,
    iteration: IterationConfig,
    calls: CallCounter,
}

impl MapNode {
    /// Creates a node adding `offset`.
    pub fn new(offset: i64) -> Self {
        Self {
            offset,
            parallel: false,
            iteration: IterationConfig::default(),
            calls: CallCounter::new(),
        }
    }

    /// Allows steps to run concurrently.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the default batching configuration.
    #[must_use]
    pub fn with_iteration(mut self, iteration: IterationConfig) -> Self {
        self.iteration = iteration;
        self
    }

    /// Returns the invocation counter.
    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

#[async_trait]
impl NodeLogic for MapNode {
    fn node_type(&self) -> &str {
        "test:map"
    }

    fn declare_slots(&self) -> SlotDeclaration {
        SlotDeclaration::new()
            .with_input("in", NUMBER)
            .with_output("out", NUMBER)
    }

    fn supports_parallel_batches(&self) -> bool {
        self.parallel
    }

    fn fingerprint(&self) -> Vec<u8> {
        self.offset.to_le_bytes().to_vec()
    }

    fn iteration_config(&self) -> IterationConfig {
        self.iteration.clone()
    }

    async fn execute(&self, step: &IterationStep, ctx: &StepContext) -> NodeResult<StepOutput> {
        self.calls.increment();
        let mut output = StepOutput::new();
        for row in step.inputs("in") {
            let item = ctx.item(row).await?;
            let value = item
                .value()
                .as_i64()
                .ok_or_else(|| NodeError::new(format!("expected a number, got {}", item.value())))?;
            output.push("out", DataItem::new(value + self.offset), AnnotationSet::new());
        }
        Ok(output)
    }
}

/// Passes rows through, failing selected steps.
#[derive(Debug, Clone)]
pub struct FailingNode {
    fail_steps: Option<BTreeSet<usize>>,
    parallel: bool,
    calls: CallCounter,
}

impl FailingNode {
    /// Creates a node failing every step.
    pub fn always() -> Self {
        Self {
            fail_steps: None,
            parallel: false,
            calls: CallCounter::new(),
        }
    }

    /// Creates a node failing only the given step indices.
    pub fn at_steps(steps: impl IntoIterator<Item = usize>) -> Self {
        Self {
            fail_steps: Some(steps.into_iter().collect()),
            ..Self::always()
        }
    }

    /// Allows steps to run concurrently.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Returns the invocation counter.
    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

#[async_trait]
impl NodeLogic for FailingNode {
    fn node_type(&self) -> &str {
        "test:failing"
    }

    fn declare_slots(&self) -> SlotDeclaration {
        SlotDeclaration::new()
            .with_input("in", NUMBER)
            .with_output("out", NUMBER)
    }

    fn supports_parallel_batches(&self) -> bool {
        self.parallel
    }

    fn fingerprint(&self) -> Vec<u8> {
        Vec::new()
    }

    async fn execute(&self, step: &IterationStep, _: &StepContext) -> NodeResult<StepOutput> {
        self.calls.increment();
        let fails = self
            .fail_steps
            .as_ref()
            .is_none_or(|steps| steps.contains(&step.index()));
        if fails {
            return Err(NodeError::new(format!("step {} failed on purpose", step.index())));
        }

        let mut output = StepOutput::new();
        for row in step.inputs("in") {
            output.push_row("out", row.clone());
        }
        Ok(output)
    }
}

/// Source node that panics when executed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingNode;

#[async_trait]
impl NodeLogic for PanickingNode {
    fn node_type(&self) -> &str {
        "test:panicking"
    }

    fn declare_slots(&self) -> SlotDeclaration {
        SlotDeclaration::new().with_output("out", NUMBER)
    }

    fn fingerprint(&self) -> Vec<u8> {
        Vec::new()
    }

    async fn execute(&self, _: &IterationStep, _: &StepContext) -> NodeResult<StepOutput> {
        panic!("mock node panicked");
    }
}

/// Parallel pass-through node that sleeps in every step.
#[derive(Debug, Clone)]
pub struct SlowNode {
    delay: Duration,
    cancel_after: Option<(usize, CancellationToken)>,
    started: CallCounter,
    completed: CallCounter,
}

impl SlowNode {
    /// Creates a node sleeping `delay` per step.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            cancel_after: None,
            started: CallCounter::new(),
            completed: CallCounter::new(),
        }
    }

    /// Cancels `token` once `steps` steps have completed.
    #[must_use]
    pub fn cancel_after(mut self, steps: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((steps, token));
        self
    }

    /// Returns the counter of started steps.
    pub fn started(&self) -> CallCounter {
        self.started.clone()
    }

    /// Returns the counter of completed steps.
    pub fn completed(&self) -> CallCounter {
        self.completed.clone()
    }
}

#[async_trait]
impl NodeLogic for SlowNode {
    fn node_type(&self) -> &str {
        "test:slow"
    }

    fn declare_slots(&self) -> SlotDeclaration {
        SlotDeclaration::new()
            .with_input("in", NUMBER)
            .with_output("out", NUMBER)
    }

    fn supports_parallel_batches(&self) -> bool {
        true
    }

    fn fingerprint(&self) -> Vec<u8> {
        self.delay.as_millis().to_le_bytes().to_vec()
    }

    async fn execute(&self, step: &IterationStep, ctx: &StepContext) -> NodeResult<StepOutput> {
        self.started.increment();
        tokio::time::sleep(self.delay).await;
        ctx.progress().log("slept");

        let mut output = StepOutput::new();
        for row in step.inputs("in") {
            output.push_row("out", row.clone());
        }

        let done = self.completed.increment();
        if let Some((steps, token)) = &self.cancel_after
            && done >= *steps
        {
            token.cancel();
        }
        Ok(output)
    }
}

//! Pipeline execution engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::{
    EngineConfig, FailurePolicy, NodeReport, NodeState, Progress, ProgressSink, RunError,
    RunReport, RunState, StepState, Timing, TracingProgress,
};
use crate::cache::{Cache, CacheKey, Fingerprint, FingerprintHasher};
use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::{GraphNode, NodeId, PipelineGraph, RunId};
use crate::iteration::{IterationStep, IterationStepGenerator, SlotInput};
use crate::node::{NodeError, NodeLogic, StepContext, StepOutput};
use crate::table::{AnnotationSet, DataTable, Row};

/// Tracing target for engine operations.
const TRACING_TARGET: &str = "strata_runtime::engine";

/// The pipeline execution engine.
///
/// Runs nodes in dependency order on a bounded worker pool. The pool is
/// shared by node-level and step-level dispatch: at most
/// `worker_pool_size` nodes are in flight and at most `worker_pool_size`
/// steps execute at once. A pool of one runs everything sequentially.
pub struct Engine {
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
    progress_sink: Arc<dyn ProgressSink>,
}

enum StepOutcome {
    NotStarted,
    Completed(StepOutput),
    Failed(NodeError),
}

struct NodeOutcome {
    report: NodeReport,
    aborts_run: bool,
}

impl Engine {
    /// Creates a new engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));

        tracing::info!(
            target: TRACING_TARGET,
            worker_pool_size = config.worker_pool_size,
            allow_incomplete = config.allow_incomplete,
            failure_policy = %config.failure_policy,
            "Pipeline engine initialized"
        );

        Self {
            config,
            semaphore,
            progress_sink: Arc::new(TracingProgress),
        }
    }

    /// Creates a new engine with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// Sets the sink receiving progress events.
    #[must_use]
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = sink;
        self
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the number of idle workers.
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Executes a pipeline graph.
    ///
    /// Never fails: graph, batching and node errors are recorded in the
    /// returned report. Cancelling `cancel` lets in-flight steps finish but
    /// starts no new steps or nodes.
    pub async fn run(
        &self,
        graph: &PipelineGraph,
        cache: &Cache,
        cancel: CancellationToken,
    ) -> RunReport {
        let run_id = RunId::new();
        let timing = Timing::start();

        tracing::info!(
            target: TRACING_TARGET,
            %run_id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Starting pipeline run"
        );

        let prepared = graph
            .topological_order()
            .and_then(|order| Ok((self.cache_keys(graph, &order)?, order)));
        let (keys, order) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => return Self::rejected(run_id, graph, &error, timing),
        };

        let progress = Progress::new("run", self.progress_sink.clone(), cancel.clone());
        progress.set_total(order.len());

        let mut states: HashMap<NodeId, NodeState> =
            order.iter().map(|id| (*id, NodeState::Waiting)).collect();
        let mut reports: HashMap<NodeId, NodeReport> = HashMap::with_capacity(order.len());
        let mut outputs: HashMap<NodeId, BTreeMap<String, DataTable>> = HashMap::new();
        let mut aborted = false;
        let mut in_flight = FuturesUnordered::new();

        loop {
            if !aborted && !cancel.is_cancelled() {
                for id in &order {
                    if in_flight.len() >= self.config.worker_pool_size {
                        break;
                    }
                    if states.get(id) != Some(&NodeState::Waiting) {
                        continue;
                    }
                    let ready = graph
                        .upstream(*id)
                        .iter()
                        .all(|upstream| states.get(upstream) == Some(&NodeState::Completed));
                    let (true, Some(node), Some(key)) = (ready, graph.node(*id), keys.get(id))
                    else {
                        continue;
                    };

                    states.insert(*id, NodeState::Ready);
                    let inputs = Self::collect_inputs(graph, node, &outputs);
                    tracing::debug!(
                        target: TRACING_TARGET,
                        node_id = %id,
                        node = node.name(),
                        "Node ready"
                    );

                    in_flight.push(self.execute_node(
                        node,
                        *key,
                        inputs,
                        cache,
                        progress.clone(),
                        cancel.clone(),
                    ));
                    states.insert(*id, NodeState::Executing);
                }
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };
            let NodeOutcome { report, aborts_run } = outcome;
            let node_id = report.node_id;
            states.insert(node_id, report.state);
            progress.advance(format!("{} {}", report.name, report.state));

            match report.state {
                NodeState::Completed => {
                    outputs.insert(node_id, report.outputs.clone());
                }
                NodeState::Failed => {
                    for descendant in graph.descendants(node_id) {
                        if states.get(&descendant) == Some(&NodeState::Waiting) {
                            states.insert(descendant, NodeState::Skipped);
                        }
                    }
                }
                _ => {}
            }
            if aborts_run {
                tracing::debug!(target: TRACING_TARGET, node_id = %node_id, "Aborting run");
                aborted = true;
            }
            reports.insert(node_id, report);
        }

        let cancelled = cancel.is_cancelled();
        let mut nodes = Vec::with_capacity(order.len());
        for id in &order {
            let report = match reports.remove(id) {
                Some(report) => report,
                None => {
                    let Some(node) = graph.node(*id) else {
                        continue;
                    };
                    let state = match states.get(id).copied().unwrap_or_default() {
                        state if state.is_terminal() => state,
                        _ if cancelled => NodeState::Cancelled,
                        _ => NodeState::Skipped,
                    };
                    NodeReport::new(node, state)
                }
            };
            nodes.push(report);
        }

        Self::finish(run_id, nodes, Vec::new(), timing)
    }

    /// Builds a failed report for a graph that cannot run at all.
    fn rejected(
        run_id: RunId,
        graph: &PipelineGraph,
        error: &RuntimeError,
        timing: Timing,
    ) -> RunReport {
        tracing::debug!(target: TRACING_TARGET, %run_id, error = %error, "Pipeline graph rejected");
        let nodes = graph
            .nodes()
            .map(|node| NodeReport::new(node, NodeState::Skipped))
            .collect();
        Self::finish(run_id, nodes, vec![RunError::new(error)], timing)
    }

    fn finish(
        run_id: RunId,
        nodes: Vec<NodeReport>,
        mut errors: Vec<RunError>,
        mut timing: Timing,
    ) -> RunReport {
        timing.finish();
        errors.extend(nodes.iter().flat_map(|node| node.errors.iter().cloned()));
        let recovered: Vec<RunError> = nodes
            .iter()
            .flat_map(|node| node.recovered.iter().cloned())
            .collect();

        let state = if nodes.iter().any(|node| node.state == NodeState::Cancelled) {
            RunState::Cancelled
        } else if !errors.is_empty() || nodes.iter().any(|node| node.state == NodeState::Failed) {
            RunState::Failed
        } else {
            RunState::Completed
        };

        let report = RunReport {
            run_id,
            state,
            nodes,
            errors,
            recovered,
            timing,
        };

        tracing::info!(
            target: TRACING_TARGET,
            %run_id,
            state = %report.state,
            cache_hits = report.cache_hits(),
            errors = report.errors.len(),
            recovered = report.recovered.len(),
            duration_ms = report.timing.duration().as_millis(),
            "Pipeline run finished"
        );
        report
    }

    /// Computes the cache key of every node.
    ///
    /// Provenance hashes the node fingerprint together with the provenance
    /// and slot of every upstream edge, in input-slot then edge order, so any
    /// upstream change reaches all descendants.
    fn cache_keys(
        &self,
        graph: &PipelineGraph,
        order: &[NodeId],
    ) -> RuntimeResult<HashMap<NodeId, CacheKey>> {
        let mut keys: HashMap<NodeId, CacheKey> = HashMap::with_capacity(order.len());
        for id in order {
            let node = graph
                .node(*id)
                .ok_or_else(|| RuntimeError::Graph(format!("node {id} does not exist")))?;
            let fingerprint = Fingerprint::of_node(node, self.config.allow_incomplete)?;

            let mut hasher = FingerprintHasher::new();
            hasher.update_fingerprint(&fingerprint);
            let incoming = graph.incoming_edges(*id);
            for slot in &node.slots().inputs {
                hasher.update(slot.name.as_bytes());
                for edge in incoming.iter().filter(|edge| edge.to.slot == slot.name) {
                    let upstream = keys.get(&edge.source()).ok_or_else(|| {
                        RuntimeError::Graph(format!("node {} precedes its input {}", id, edge.from))
                    })?;
                    hasher
                        .update_fingerprint(&upstream.provenance)
                        .update(edge.from.slot.as_bytes());
                }
            }

            keys.insert(
                *id,
                CacheKey {
                    node_id: *id,
                    fingerprint,
                    provenance: hasher.finish(),
                },
            );
        }
        Ok(keys)
    }

    /// Binds upstream output tables to a node's input slots.
    ///
    /// Tables of several edges into one slot are concatenated in edge order.
    fn collect_inputs(
        graph: &PipelineGraph,
        node: &GraphNode,
        outputs: &HashMap<NodeId, BTreeMap<String, DataTable>>,
    ) -> Vec<SlotInput> {
        let incoming = graph.incoming_edges(node.id());
        node.slots()
            .inputs
            .iter()
            .map(|spec| {
                let tables: Vec<&DataTable> = incoming
                    .iter()
                    .filter(|edge| edge.to.slot == spec.name)
                    .filter_map(|edge| {
                        outputs
                            .get(&edge.source())
                            .and_then(|slots| slots.get(&edge.from.slot))
                    })
                    .collect();
                SlotInput {
                    name: spec.name.clone(),
                    optional: spec.optional,
                    table: DataTable::concat(spec.kind.clone(), tables),
                }
            })
            .collect()
    }

    async fn execute_node(
        &self,
        node: &GraphNode,
        key: CacheKey,
        inputs: Vec<SlotInput>,
        cache: &Cache,
        run_progress: Progress,
        cancel: CancellationToken,
    ) -> NodeOutcome {
        let node_id = node.id();
        let mut report = NodeReport::new(node, NodeState::Executing);
        let mut timing = Timing::start();

        if cancel.is_cancelled() {
            report.state = NodeState::Cancelled;
            return NodeOutcome {
                report,
                aborts_run: false,
            };
        }

        match cache.lookup(&key).await {
            Ok(Some(entry)) => {
                timing.finish();
                report.state = NodeState::Completed;
                report.cache_hit = true;
                report.outputs = entry.outputs().clone();
                report.timing = Some(timing);
                return NodeOutcome {
                    report,
                    aborts_run: false,
                };
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    node_id = %node_id,
                    error = %error,
                    "Cached result could not be reloaded, recomputing"
                );
                cache.remove(&key);
                report.recovered.push(RunError::for_node(node_id, &error));
            }
        }

        let generator =
            IterationStepGenerator::new(node.iteration().clone(), self.config.allow_incomplete);
        let steps = match generator.generate(&inputs) {
            Ok(steps) => steps,
            Err(error) => {
                tracing::debug!(
                    target: TRACING_TARGET,
                    node_id = %node_id,
                    error = %error,
                    "Iteration steps could not be generated"
                );
                timing.finish();
                report.state = NodeState::Failed;
                report.errors.push(RunError::for_node(node_id, &error));
                report.timing = Some(timing);
                return NodeOutcome {
                    report,
                    aborts_run: true,
                };
            }
        };

        let parallel = node.logic().supports_parallel_batches()
            && self.config.worker_pool_size > 1
            && steps.len() > 1;
        tracing::debug!(
            target: TRACING_TARGET,
            node_id = %node_id,
            node = node.name(),
            steps = steps.len(),
            parallel,
            "Executing node"
        );

        let progress = run_progress.child(node.name(), steps.len());
        let merged: Vec<AnnotationSet> = steps
            .iter()
            .map(|step| step.merged_annotations().clone())
            .collect();
        report.steps = vec![StepState::NotStarted; steps.len()];

        let completed = if parallel {
            self.run_parallel(node, steps, &mut report, &progress, cache, &cancel)
                .await
        } else {
            self.run_sequential(node, steps, &mut report, &progress, cache, &cancel)
                .await
        };

        let outputs = Self::assemble_outputs(node, &merged, completed, &mut report);

        report.state = if report.steps.contains(&StepState::Failed) {
            NodeState::Failed
        } else if report.steps.contains(&StepState::NotStarted) {
            NodeState::Cancelled
        } else {
            NodeState::Completed
        };

        if report.state == NodeState::Completed {
            cache.store(key, outputs.clone()).await;
        }

        timing.finish();
        report.outputs = outputs;
        report.timing = Some(timing);

        tracing::debug!(
            target: TRACING_TARGET,
            node_id = %node_id,
            state = %report.state,
            completed = report.steps_in(StepState::Completed),
            failed = report.steps_in(StepState::Failed),
            duration_ms = timing.duration().as_millis(),
            "Node finished"
        );

        NodeOutcome {
            report,
            aborts_run: false,
        }
    }

    async fn run_sequential(
        &self,
        node: &GraphNode,
        steps: Vec<IterationStep>,
        report: &mut NodeReport,
        progress: &Progress,
        cache: &Cache,
        cancel: &CancellationToken,
    ) -> Vec<(usize, StepOutput)> {
        let halt = Arc::new(AtomicBool::new(false));
        let mut completed = Vec::with_capacity(steps.len());

        for step in steps {
            if cancel.is_cancelled() || halt.load(Ordering::Acquire) {
                break;
            }

            let index = step.index();
            let ctx = Self::step_context(node, index, progress, cache, cancel);
            let task = tokio::spawn(run_step(
                node.logic().clone(),
                step,
                ctx,
                self.semaphore.clone(),
                halt.clone(),
            ));
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(error) => StepOutcome::Failed(join_failure(error)),
            };

            if let Some(output) =
                self.record_step(node.id(), report, index, outcome, &halt, progress)
            {
                completed.push((index, output));
            }
        }
        completed
    }

    /// Runs all steps concurrently, bounded by the worker pool.
    ///
    /// Outputs are returned in completion order.
    async fn run_parallel(
        &self,
        node: &GraphNode,
        steps: Vec<IterationStep>,
        report: &mut NodeReport,
        progress: &Progress,
        cache: &Cache,
        cancel: &CancellationToken,
    ) -> Vec<(usize, StepOutput)> {
        let halt = Arc::new(AtomicBool::new(false));
        let mut completed = Vec::with_capacity(steps.len());
        let mut tasks = JoinSet::new();
        let mut indices = HashMap::with_capacity(steps.len());

        for step in steps {
            let index = step.index();
            let ctx = Self::step_context(node, index, progress, cache, cancel);
            let handle = tasks.spawn(run_step(
                node.logic().clone(),
                step,
                ctx,
                self.semaphore.clone(),
                halt.clone(),
            ));
            indices.insert(handle.id(), index);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((task_id, outcome)) => (task_id, outcome),
                Err(error) => (error.id(), StepOutcome::Failed(join_failure(error))),
            };
            let Some(index) = indices.get(&task_id).copied() else {
                continue;
            };
            if let Some(output) =
                self.record_step(node.id(), report, index, outcome, &halt, progress)
            {
                completed.push((index, output));
            }
        }
        completed
    }

    fn step_context(
        node: &GraphNode,
        index: usize,
        progress: &Progress,
        cache: &Cache,
        cancel: &CancellationToken,
    ) -> StepContext {
        StepContext::new(
            node.id(),
            index,
            progress.child(format!("step {index}"), 0),
            cache.storage().clone(),
            cancel.clone(),
        )
    }

    fn record_step(
        &self,
        node_id: NodeId,
        report: &mut NodeReport,
        index: usize,
        outcome: StepOutcome,
        halt: &AtomicBool,
        progress: &Progress,
    ) -> Option<StepOutput> {
        match outcome {
            StepOutcome::NotStarted => None,
            StepOutcome::Completed(output) => {
                report.steps[index] = StepState::Completed;
                progress.advance(format!("step {index} completed"));
                Some(output)
            }
            StepOutcome::Failed(source) => {
                let error = RuntimeError::NodeExecution {
                    node_id,
                    step: Some(index),
                    source,
                };
                tracing::debug!(
                    target: TRACING_TARGET,
                    node_id = %node_id,
                    step = index,
                    error = %error,
                    "Step failed"
                );

                report.steps[index] = StepState::Failed;
                report.errors.push(RunError::new(&error));
                if self.config.failure_policy == FailurePolicy::AbortOnFirstFailure {
                    halt.store(true, Ordering::Release);
                }
                progress.advance(format!("step {index} failed"));
                None
            }
        }
    }

    /// Builds one table per declared output slot.
    ///
    /// Rows inherit the merged annotations of their step, overridden by the
    /// annotations the node set. A step writing to an undeclared slot fails.
    fn assemble_outputs(
        node: &GraphNode,
        merged: &[AnnotationSet],
        completed: Vec<(usize, StepOutput)>,
        report: &mut NodeReport,
    ) -> BTreeMap<String, DataTable> {
        let mut rows: BTreeMap<String, Vec<Row>> = BTreeMap::new();

        for (index, output) in completed {
            let unknown = output
                .slots()
                .find(|slot| node.slots().output(slot).is_none())
                .map(str::to_owned);
            if let Some(slot) = unknown {
                let error = RuntimeError::NodeExecution {
                    node_id: node.id(),
                    step: Some(index),
                    source: NodeError::new(format!("unknown output slot '{slot}'")),
                };
                report.steps[index] = StepState::Failed;
                report.errors.push(RunError::new(&error));
                continue;
            }

            let inherited = &merged[index];
            for (slot, produced) in output.into_rows() {
                rows.entry(slot).or_default().extend(produced.into_iter().map(|row| {
                    let annotations = inherited.overlaid_with(row.annotations());
                    row.with_annotations(annotations)
                }));
            }
        }

        node.slots()
            .outputs
            .iter()
            .map(|spec| {
                let slot_rows = rows.remove(&spec.name).unwrap_or_default();
                (spec.name.clone(), DataTable::new(spec.kind.clone(), slot_rows))
            })
            .collect()
    }
}

/// Executes one step once a worker is free.
///
/// Cancellation and the node's halt flag are checked after the worker is
/// acquired, so queued steps never start once either is set.
async fn run_step(
    logic: Arc<dyn NodeLogic>,
    step: IterationStep,
    ctx: StepContext,
    semaphore: Arc<Semaphore>,
    halt: Arc<AtomicBool>,
) -> StepOutcome {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return StepOutcome::NotStarted;
    };
    if ctx.is_cancelled() || halt.load(Ordering::Acquire) {
        return StepOutcome::NotStarted;
    }

    tracing::trace!(
        target: TRACING_TARGET,
        node_id = %ctx.node_id(),
        step = ctx.step_index(),
        rows = step.row_count(),
        "Dispatching step"
    );

    match logic.execute(&step, &ctx).await {
        Ok(output) => StepOutcome::Completed(output),
        Err(error) => StepOutcome::Failed(error),
    }
}

fn join_failure(error: JoinError) -> NodeError {
    if !error.is_panic() {
        return NodeError::new("step task was aborted");
    }

    let payload = error.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    NodeError::new(format!("step panicked: {message}"))
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("available_workers", &self.available_workers())
            .finish()
    }
}

//! End-to-end tests of the pipeline engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use strata_runtime::cache::CacheKey;
use strata_runtime::prelude::*;
use strata_test::{
    CountingSource, FailingNode, FlakyStorage, MapNode, PanickingNode, RecordingProgress, SlowNode,
};

fn engine(workers: usize) -> Engine {
    Engine::new(EngineConfig::builder().worker_pool_size(workers).build().unwrap())
}

fn values(table: &DataTable) -> Vec<i64> {
    table
        .rows()
        .iter()
        .map(|row| row.item().unwrap().value().as_i64().unwrap())
        .collect()
}

fn sorted(mut values: Vec<i64>) -> Vec<i64> {
    values.sort_unstable();
    values
}

fn sample(value: &str) -> AnnotationSet {
    AnnotationSet::new().with("sample", value)
}

/// Combines one row of `left` with one row of `right`.
#[derive(Debug)]
struct PairNode;

#[async_trait]
impl NodeLogic for PairNode {
    fn node_type(&self) -> &str {
        "test:pair"
    }

    fn declare_slots(&self) -> SlotDeclaration {
        SlotDeclaration::new()
            .with_input("left", "number")
            .with_input("right", "number")
            .with_output("out", "number")
    }

    fn fingerprint(&self) -> Vec<u8> {
        Vec::new()
    }

    fn iteration_config(&self) -> IterationConfig {
        IterationConfig::new(IterationStrategy::AnnotationMerge)
    }

    async fn execute(&self, step: &IterationStep, ctx: &StepContext) -> NodeResult<StepOutput> {
        let mut output = StepOutput::new();
        if let (Some(left), Some(right)) = (step.input("left"), step.input("right")) {
            let left = ctx.item(left).await?.value().as_i64().unwrap_or_default();
            let right = ctx.item(right).await?.value().as_i64().unwrap_or_default();
            output.push("out", DataItem::new(left * 10 + right), AnnotationSet::new());
        }
        Ok(output)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nodes_run_in_dependency_order() {
    let mut graph = PipelineGraph::new();
    let source = graph.add_named_node("source", CountingSource::new([1, 2])).unwrap();
    let left = graph.add_named_node("left", MapNode::new(10)).unwrap();
    let right = graph.add_named_node("right", MapNode::new(20)).unwrap();
    let join = graph.add_named_node("join", MapNode::new(0)).unwrap();
    graph.connect(SlotRef::new(source, "out"), SlotRef::new(left, "in")).unwrap();
    graph.connect(SlotRef::new(source, "out"), SlotRef::new(right, "in")).unwrap();
    graph.connect(SlotRef::new(left, "out"), SlotRef::new(join, "in")).unwrap();
    graph.connect(SlotRef::new(right, "out"), SlotRef::new(join, "in")).unwrap();

    let report = engine(4).run(&graph, &Cache::default(), CancellationToken::new()).await;
    assert_eq!(report.state(), RunState::Completed);

    let position = |id| report.nodes.iter().position(|node| node.node_id == id).unwrap();
    assert_eq!(position(source), 0);
    assert!(position(left) < position(join));
    assert!(position(right) < position(join));

    // Tables of both edges into "in" are concatenated in edge order.
    let joined = report.output(join, "out").unwrap();
    assert_eq!(values(joined), [11, 12, 21, 22]);
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let source = CountingSource::new([1, 2, 3]);
    let map = MapNode::new(1);
    let (source_calls, map_calls) = (source.calls(), map.calls());

    let mut graph = PipelineGraph::new();
    let a = graph.add_node(source).unwrap();
    let b = graph.add_node(map).unwrap();
    graph.connect(SlotRef::new(a, "out"), SlotRef::new(b, "in")).unwrap();

    let cache = Cache::default();
    let engine = engine(2);
    let first = engine.run(&graph, &cache, CancellationToken::new()).await;
    assert_eq!(first.state(), RunState::Completed);
    assert_eq!(first.cache_hits(), 0);
    assert_eq!(map_calls.get(), 3);

    let second = engine.run(&graph, &cache, CancellationToken::new()).await;
    assert_eq!(second.state(), RunState::Completed);
    assert_eq!(second.cache_hits(), 2);
    assert_eq!(source_calls.get(), 1);
    assert_eq!(map_calls.get(), 3);
    assert_eq!(values(second.output(b, "out").unwrap()), [2, 3, 4]);
}

#[tokio::test]
async fn test_parameter_change_invalidates_downstream_only() {
    let (a, b, c, d) = (NodeId::new(), NodeId::new(), NodeId::new(), NodeId::new());
    let build = |version: u32| {
        let mut graph = PipelineGraph::new();
        let source = CountingSource::new([1, 2]).with_version(version);
        graph.add_node_with_id(a, None, Arc::new(source)).unwrap();
        graph.add_node_with_id(b, None, Arc::new(MapNode::new(1))).unwrap();
        graph.add_node_with_id(c, None, Arc::new(CountingSource::new([5]))).unwrap();
        graph.add_node_with_id(d, None, Arc::new(MapNode::new(1))).unwrap();
        graph.connect(SlotRef::new(a, "out"), SlotRef::new(b, "in")).unwrap();
        graph.connect(SlotRef::new(c, "out"), SlotRef::new(d, "in")).unwrap();
        graph
    };

    let cache = Cache::default();
    let engine = engine(2);
    engine.run(&build(0), &cache, CancellationToken::new()).await;

    let report = engine.run(&build(1), &cache, CancellationToken::new()).await;
    let hit = |id| report.node(id).unwrap().cache_hit;
    assert!(!hit(a));
    assert!(!hit(b));
    assert!(hit(c));
    assert!(hit(d));

    // Entries of the previous fingerprint are kept.
    assert_eq!(cache.entries_for(a).len(), 2);
    assert_eq!(cache.entries_for(c).len(), 1);
}

#[tokio::test]
async fn test_annotation_merge_pairs_by_sample() {
    let mut graph = PipelineGraph::new();
    let x = graph
        .add_node(CountingSource::annotated([(1, sample("s1")), (2, sample("s2"))]))
        .unwrap();
    let y = graph
        .add_node(CountingSource::annotated([(3, sample("s2")), (4, sample("s1"))]))
        .unwrap();
    let pair = graph.add_node(PairNode).unwrap();
    graph.connect(SlotRef::new(x, "out"), SlotRef::new(pair, "left")).unwrap();
    graph.connect(SlotRef::new(y, "out"), SlotRef::new(pair, "right")).unwrap();

    let report = engine(2).run(&graph, &Cache::default(), CancellationToken::new()).await;
    assert_eq!(report.state(), RunState::Completed);

    let out = report.output(pair, "out").unwrap();
    assert_eq!(values(out), [14, 23]);
    let samples: Vec<_> = out.rows().iter().map(|row| row.annotation("sample")).collect();
    assert_eq!(samples, [Some("s1"), Some("s2")]);
}

#[tokio::test]
async fn test_incomplete_policy_is_part_of_cache_key() {
    let mut graph = PipelineGraph::new();
    let x = graph
        .add_node(CountingSource::annotated([(1, sample("1")), (2, sample("2"))]))
        .unwrap();
    let y = graph
        .add_node(CountingSource::annotated([(1, sample("1")), (3, sample("3"))]))
        .unwrap();
    let pair = graph.add_node(PairNode).unwrap();
    graph.connect(SlotRef::new(x, "out"), SlotRef::new(pair, "left")).unwrap();
    graph.connect(SlotRef::new(y, "out"), SlotRef::new(pair, "right")).unwrap();

    let cache = Cache::default();
    let strict = engine(2).run(&graph, &cache, CancellationToken::new()).await;
    assert_eq!(strict.state(), RunState::Completed);
    assert_eq!(strict.node(pair).unwrap().steps.len(), 1);

    let config = EngineConfig::builder()
        .worker_pool_size(2usize)
        .allow_incomplete(true)
        .build()
        .unwrap();
    let lenient = Engine::new(config)
        .run(&graph, &cache, CancellationToken::new())
        .await;
    assert_eq!(lenient.state(), RunState::Completed);

    let node = lenient.node(pair).unwrap();
    assert!(!node.cache_hit);
    assert_eq!(node.steps.len(), 3);
    assert_eq!(values(node.output("out").unwrap()), [11]);
    assert_eq!(cache.entries_for(pair).len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pool_size_does_not_change_results() {
    let build = || {
        let mut graph = PipelineGraph::new();
        let source = graph.add_node(CountingSource::new(0..16)).unwrap();
        let map = graph.add_node(MapNode::new(100).with_parallel(true)).unwrap();
        graph.connect(SlotRef::new(source, "out"), SlotRef::new(map, "in")).unwrap();
        (graph, map)
    };

    let (graph, map) = build();
    let sequential = engine(1).run(&graph, &Cache::default(), CancellationToken::new()).await;
    let (graph, parallel_map) = build();
    let parallel = engine(4).run(&graph, &Cache::default(), CancellationToken::new()).await;

    let sequential = values(sequential.output(map, "out").unwrap());
    assert_eq!(sequential, (100..116).collect::<Vec<_>>());
    let parallel = values(parallel.output(parallel_map, "out").unwrap());
    assert_eq!(sorted(parallel), sequential);
}

#[tokio::test]
async fn test_failure_skips_descendants() {
    let failing = FailingNode::always();
    let calls = failing.calls();
    let tail = MapNode::new(1);
    let tail_calls = tail.calls();

    let mut graph = PipelineGraph::new();
    let n1 = graph.add_node(CountingSource::new([1, 2, 3])).unwrap();
    let n2 = graph.add_node(MapNode::new(1)).unwrap();
    let n3 = graph.add_node(failing).unwrap();
    let n4 = graph.add_node(tail).unwrap();
    let n5 = graph.add_node(MapNode::new(1)).unwrap();
    for (from, to) in [(n1, n2), (n2, n3), (n3, n4), (n4, n5)] {
        graph.connect(SlotRef::new(from, "out"), SlotRef::new(to, "in")).unwrap();
    }

    let cache = Cache::default();
    let report = engine(2).run(&graph, &cache, CancellationToken::new()).await;
    assert_eq!(report.state(), RunState::Failed);
    assert_eq!(report.node_state(n1), Some(NodeState::Completed));
    assert_eq!(report.node_state(n2), Some(NodeState::Completed));
    assert_eq!(report.node_state(n3), Some(NodeState::Failed));
    assert_eq!(report.node_state(n4), Some(NodeState::Skipped));
    assert_eq!(report.node_state(n5), Some(NodeState::Skipped));

    // The first failing step halts the rest of the node.
    assert_eq!(calls.get(), 1);
    assert_eq!(tail_calls.get(), 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors_of_kind(ErrorKind::NodeExecution).count(), 1);
    assert_eq!(report.errors[0].node_id, Some(n3));
    assert_eq!(report.errors[0].step, Some(0));

    let failed = report.node(n3).unwrap();
    assert_eq!(failed.steps_in(StepState::Failed), 1);
    assert_eq!(failed.steps_in(StepState::NotStarted), 2);
    assert!(cache.entries_for(n3).is_empty());
    assert_eq!(cache.entries_for(n2).len(), 1);
}

#[tokio::test]
async fn test_collect_all_runs_every_step() {
    let failing = FailingNode::at_steps([0, 2]);
    let calls = failing.calls();
    let sibling = MapNode::new(1);

    let mut graph = PipelineGraph::new();
    let source = graph.add_node(CountingSource::new([1, 2, 3, 4])).unwrap();
    let fail = graph.add_node(failing).unwrap();
    let side = graph.add_node(sibling).unwrap();
    graph.connect(SlotRef::new(source, "out"), SlotRef::new(fail, "in")).unwrap();
    graph.connect(SlotRef::new(source, "out"), SlotRef::new(side, "in")).unwrap();

    let config = EngineConfig::builder()
        .worker_pool_size(1usize)
        .failure_policy(FailurePolicy::CollectAll)
        .build()
        .unwrap();
    let report = Engine::new(config)
        .run(&graph, &Cache::default(), CancellationToken::new())
        .await;

    assert_eq!(report.state(), RunState::Failed);
    assert_eq!(calls.get(), 4);
    let failed = report.node(fail).unwrap();
    assert_eq!(failed.state, NodeState::Failed);
    assert_eq!(failed.steps_in(StepState::Completed), 2);
    assert_eq!(failed.errors.len(), 2);

    // Independent branches are unaffected.
    assert_eq!(report.node_state(side), Some(NodeState::Completed));
    assert_eq!(values(report.output(side, "out").unwrap()), [2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_stops_new_steps() {
    let cancel = CancellationToken::new();
    let slow = SlowNode::new(Duration::from_millis(50)).cancel_after(1, cancel.clone());
    let (started, completed) = (slow.started(), slow.completed());
    let after = MapNode::new(1);
    let after_calls = after.calls();

    let mut graph = PipelineGraph::new();
    let source = graph.add_node(CountingSource::new(0..10)).unwrap();
    let slow = graph.add_node(slow).unwrap();
    let downstream = graph.add_node(after).unwrap();
    graph.connect(SlotRef::new(source, "out"), SlotRef::new(slow, "in")).unwrap();
    graph.connect(SlotRef::new(slow, "out"), SlotRef::new(downstream, "in")).unwrap();

    let cache = Cache::default();
    let report = engine(4).run(&graph, &cache, cancel).await;

    assert_eq!(report.state(), RunState::Cancelled);
    assert_eq!(report.node_state(source), Some(NodeState::Completed));
    assert_eq!(report.node_state(downstream), Some(NodeState::Cancelled));
    assert_eq!(after_calls.get(), 0);

    let node = report.node(slow).unwrap();
    assert_eq!(node.state, NodeState::Cancelled);
    assert_eq!(started.get(), completed.get());
    assert_eq!(node.steps_in(StepState::Completed), completed.get());
    assert!(node.steps_in(StepState::NotStarted) > 0);
    assert_eq!(node.output("out").unwrap().len(), completed.get());

    // Partial results are never cached.
    assert!(cache.entries_for(slow).is_empty());
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_failed_reload_is_recomputed() {
    let storage = Arc::new(FlakyStorage::new());
    let cache = Cache::new(storage.clone(), CacheConfig::default());
    let source = CountingSource::new([7, 8]);
    let calls = source.calls();

    let mut graph = PipelineGraph::new();
    let a = graph.add_node(source).unwrap();
    let b = graph.add_node(MapNode::new(1)).unwrap();
    graph.connect(SlotRef::new(a, "out"), SlotRef::new(b, "in")).unwrap();

    let engine = engine(2);
    engine.run(&graph, &cache, CancellationToken::new()).await;

    let key: CacheKey = *cache.entries_for(a)[0].key();
    assert_eq!(cache.evict_payloads(&key).await.unwrap(), 2);
    storage.set_fail_loads(true);

    let report = engine.run(&graph, &cache, CancellationToken::new()).await;
    assert_eq!(report.state(), RunState::Completed);
    assert_eq!(calls.get(), 2);
    assert_eq!(report.recovered.len(), 1);
    assert_eq!(report.recovered[0].kind, ErrorKind::CacheIo);
    assert_eq!(report.recovered[0].node_id, Some(a));
    assert!(report.errors.is_empty());

    let recomputed = report.node(a).unwrap();
    assert!(!recomputed.cache_hit);
    assert_eq!(values(recomputed.output("out").unwrap()), [7, 8]);
    assert!(report.node(b).unwrap().cache_hit);

    // The recomputed result replaces the entry that could not be reloaded.
    let third = engine.run(&graph, &cache, CancellationToken::new()).await;
    assert!(third.recovered.is_empty());
    assert!(third.node(a).unwrap().cache_hit);
    assert_eq!(calls.get(), 2);
    assert_eq!(cache.entries_for(a).len(), 1);
}

#[tokio::test]
async fn test_panicking_step_fails_its_node() {
    let mut graph = PipelineGraph::new();
    let panicking = graph.add_node(PanickingNode).unwrap();
    let healthy = graph.add_node(CountingSource::new([1])).unwrap();

    let report = engine(2).run(&graph, &Cache::default(), CancellationToken::new()).await;
    assert_eq!(report.state(), RunState::Failed);
    assert_eq!(report.node_state(panicking), Some(NodeState::Failed));
    assert_eq!(report.node_state(healthy), Some(NodeState::Completed));

    let error = &report.node(panicking).unwrap().errors[0];
    assert_eq!(error.kind, ErrorKind::NodeExecution);
    assert!(error.message.contains("step panicked: mock node panicked"));
}

#[tokio::test]
async fn test_shape_mismatch_aborts_run() {
    let mut graph = PipelineGraph::new();
    let x = graph.add_node(CountingSource::new([1, 2])).unwrap();
    let y = graph.add_node(CountingSource::new([3])).unwrap();
    let pair = graph.add_node(PairNode).unwrap();
    graph
        .set_iteration_config(pair, IterationConfig::new(IterationStrategy::SingleRow))
        .unwrap();
    graph.connect(SlotRef::new(x, "out"), SlotRef::new(pair, "left")).unwrap();
    graph.connect(SlotRef::new(y, "out"), SlotRef::new(pair, "right")).unwrap();

    let report = engine(1).run(&graph, &Cache::default(), CancellationToken::new()).await;
    assert_eq!(report.state(), RunState::Failed);
    assert_eq!(report.node_state(pair), Some(NodeState::Failed));
    assert_eq!(report.errors_of_kind(ErrorKind::ShapeMismatch).count(), 1);
}

#[test]
fn test_unknown_node_type_is_rejected() {
    let registry = NodeRegistry::new();
    let mut graph = PipelineGraph::new();

    let error = graph
        .add_registered(&registry, "test:missing", &json!({}))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(graph.is_empty());
}

#[tokio::test]
async fn test_evicted_payloads_reload_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(
        Arc::new(FsStorage::new(dir.path())),
        CacheConfig::default().with_max_resident_rows(0),
    );

    let mut graph = PipelineGraph::new();
    let a = graph.add_node(CountingSource::new([1, 2, 3])).unwrap();
    let b = graph.add_node(MapNode::new(1)).unwrap();
    graph.connect(SlotRef::new(a, "out"), SlotRef::new(b, "in")).unwrap();

    let engine = engine(2);
    let first = engine.run(&graph, &cache, CancellationToken::new()).await;
    assert_eq!(first.state(), RunState::Completed);
    assert_eq!(cache.stats().resident_rows, 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 6);

    let second = engine.run(&graph, &cache, CancellationToken::new()).await;
    assert_eq!(second.cache_hits(), 2);
    assert_eq!(values(second.output(b, "out").unwrap()), [2, 3, 4]);
}

#[tokio::test]
async fn test_progress_is_reported_per_node() {
    let recorder = Arc::new(RecordingProgress::new());
    let mut graph = PipelineGraph::new();
    let source = graph.add_named_node("numbers", CountingSource::new([1, 2])).unwrap();
    let map = graph.add_named_node("plus", MapNode::new(1)).unwrap();
    graph.connect(SlotRef::new(source, "out"), SlotRef::new(map, "in")).unwrap();

    let engine = engine(1).with_progress_sink(recorder.clone());
    engine.run(&graph, &Cache::default(), CancellationToken::new()).await;

    let events = recorder.events();
    let node_events: Vec<_> = events
        .iter()
        .filter(|event| event.scope() == "run/plus")
        .collect();
    assert_eq!(node_events.len(), 2);
    assert_eq!(node_events[1].percentage(), Some(100.0));

    let last = events.last().unwrap();
    assert_eq!(last.scope(), "run");
    assert_eq!((last.completed, last.total), (2, 2));
}

//! Demonstration node types and pipeline.

use async_trait::async_trait;
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::json;
use strata_runtime::graph::{DataKind, NodeId, PipelineGraph, SlotDeclaration, SlotRef};
use strata_runtime::iteration::{IterationConfig, IterationStep, IterationStrategy, MatchKeys};
use strata_runtime::node::{NodeError, NodeLogic, NodeRegistry, NodeResult, StepContext, StepOutput};
use strata_runtime::table::{AnnotationSet, DataItem};
use uuid::Uuid;

const NUMBER: &str = "number";

/// Shape of the demonstration pipeline.
#[derive(Debug, Clone, Args)]
pub struct DemoArgs {
    /// Numbers emitted by the source node.
    #[arg(long, env = "STRATA_DEMO_COUNT", default_value_t = 12)]
    pub count: u32,

    /// Number of samples the numbers are spread over.
    #[arg(long, env = "STRATA_DEMO_SAMPLES", default_value_t = 3)]
    pub samples: u32,

    /// Factor applied by the scaling node.
    #[arg(long, env = "STRATA_DEMO_FACTOR", default_value_t = 2)]
    pub factor: i64,
}

/// Emits `0..count`, annotating each number with its sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Numbers {
    count: u32,
    samples: u32,
}

#[async_trait]
impl NodeLogic for Numbers {
    fn node_type(&self) -> &str {
        "demo:numbers"
    }

    fn declare_slots(&self) -> SlotDeclaration {
        SlotDeclaration::new().with_output("numbers", NUMBER)
    }

    fn fingerprint(&self) -> Vec<u8> {
        [self.count.to_le_bytes(), self.samples.to_le_bytes()].concat()
    }

    async fn execute(&self, _: &IterationStep, ctx: &StepContext) -> NodeResult<StepOutput> {
        let samples = self.samples.max(1);
        let mut output = StepOutput::new();
        for value in 0..self.count {
            let sample = format!("s{}", value % samples);
            output.push(
                "numbers",
                DataItem::new(value),
                AnnotationSet::new().with("sample", sample),
            );
        }
        ctx.progress().log(format!("emitted {} numbers", self.count));
        Ok(output)
    }
}

/// Multiplies every number by a factor, one step per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Scale {
    factor: i64,
}

#[async_trait]
impl NodeLogic for Scale {
    fn node_type(&self) -> &str {
        "demo:scale"
    }

    fn declare_slots(&self) -> SlotDeclaration {
        SlotDeclaration::new()
            .with_input("numbers", NUMBER)
            .with_output("scaled", NUMBER)
    }

    fn supports_parallel_batches(&self) -> bool {
        true
    }

    fn fingerprint(&self) -> Vec<u8> {
        self.factor.to_le_bytes().to_vec()
    }

    async fn execute(&self, step: &IterationStep, ctx: &StepContext) -> NodeResult<StepOutput> {
        let mut output = StepOutput::new();
        for row in step.inputs("numbers") {
            let value = number(&*ctx.item(row).await?)?;
            output.push("scaled", DataItem::new(value * self.factor), AnnotationSet::new());
        }
        Ok(output)
    }
}

/// Sums all numbers sharing a sample annotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sum;

#[async_trait]
impl NodeLogic for Sum {
    fn node_type(&self) -> &str {
        "demo:sum"
    }

    fn declare_slots(&self) -> SlotDeclaration {
        SlotDeclaration::new()
            .with_input("numbers", NUMBER)
            .with_output("sums", DataKind::any())
    }

    fn fingerprint(&self) -> Vec<u8> {
        Vec::new()
    }

    fn iteration_config(&self) -> IterationConfig {
        IterationConfig::new(IterationStrategy::MergingMany)
            .with_match_keys(MatchKeys::custom(["sample"]))
    }

    async fn execute(&self, step: &IterationStep, ctx: &StepContext) -> NodeResult<StepOutput> {
        let mut total = 0;
        let rows = step.inputs("numbers");
        for row in rows {
            total += number(&*ctx.item(row).await?)?;
        }
        let sum = json!({ "rows": rows.len(), "total": total });
        Ok(StepOutput::new().with("sums", sum, AnnotationSet::new()))
    }
}

fn number(item: &DataItem) -> NodeResult<i64> {
    item.value()
        .as_i64()
        .ok_or_else(|| NodeError::new(format!("expected a number, got {}", item.value())))
}

/// Returns a registry with every demonstration node type.
pub fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry
        .register_deserializable::<Numbers>("demo:numbers")
        .register_deserializable::<Scale>("demo:scale")
        .register_deserializable::<Sum>("demo:sum");
    registry
}

/// Builds `numbers -> scale -> sum`, returning the graph and the sum node.
///
/// Node identities are fixed so repeated runs against a persistent cache
/// reuse earlier results.
pub fn pipeline(
    registry: &NodeRegistry,
    args: &DemoArgs,
) -> strata_runtime::RuntimeResult<(PipelineGraph, NodeId)> {
    let mut graph = PipelineGraph::new();

    let numbers = graph.add_node_with_id(
        demo_id(1),
        Some("numbers".into()),
        registry.create(
            "demo:numbers",
            &json!({ "count": args.count, "samples": args.samples }),
        )?,
    )?;
    let scale = graph.add_node_with_id(
        demo_id(2),
        Some("scale".into()),
        registry.create("demo:scale", &json!({ "factor": args.factor }))?,
    )?;
    let sum = graph.add_node_with_id(
        demo_id(3),
        Some("sum".into()),
        registry.create("demo:sum", &serde_json::Value::Null)?,
    )?;

    graph.connect(SlotRef::new(numbers, "numbers"), SlotRef::new(scale, "numbers"))?;
    graph.connect(SlotRef::new(scale, "scaled"), SlotRef::new(sum, "numbers"))?;
    Ok((graph, sum))
}

fn demo_id(n: u128) -> NodeId {
    NodeId::from_uuid(Uuid::from_u128(0x0190_0000_0000_7000_8000_0000_0000_0000 | n))
}

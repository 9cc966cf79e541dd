//! Run report rendering.

use std::io::{self, Write};

use strata_runtime::engine::RunReport;
use strata_runtime::graph::NodeId;

use crate::config::ReportFormat;

/// Writes a run report to `out`.
pub fn write_report(
    out: &mut impl Write,
    report: &RunReport,
    result_node: NodeId,
    format: ReportFormat,
) -> io::Result<()> {
    match format {
        ReportFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, report)?;
            writeln!(out)
        }
        ReportFormat::Table => write_table(out, report, result_node),
    }
}

fn write_table(out: &mut impl Write, report: &RunReport, result_node: NodeId) -> io::Result<()> {
    writeln!(
        out,
        "run {} {} in {}ms",
        report.run_id,
        report.state,
        report.timing.duration().as_millis()
    )?;
    writeln!(
        out,
        "{:<12} {:<10} {:>6} {:>6} {:>6}",
        "node", "state", "cached", "steps", "failed"
    )?;
    for node in &report.nodes {
        writeln!(
            out,
            "{:<12} {:<10} {:>6} {:>6} {:>6}",
            node.name,
            node.state.as_ref(),
            if node.cache_hit { "yes" } else { "no" },
            node.steps.len(),
            node.errors.len(),
        )?;
    }

    for error in report.errors.iter().chain(&report.recovered) {
        writeln!(out, "{}: {}", error.kind, error.message)?;
    }

    if let Some(table) = report.output(result_node, "sums") {
        for row in table.rows() {
            let sample = row.annotation("sample").unwrap_or("-");
            let value = row
                .item()
                .map(|item| item.value().to_string())
                .unwrap_or_else(|| "<evicted>".to_owned());
            writeln!(out, "{sample}: {value}")?;
        }
    }
    Ok(())
}

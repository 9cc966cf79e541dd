#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod demo;
mod report;

use std::process;

use anyhow::Context;
use strata_runtime::engine::Engine;
use tokio_util::sync::CancellationToken;

use crate::config::{Cli, Command, RunArgs};

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "strata_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "strata_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "strata_cli::config";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %error,
            "application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();
    cli.init_tracing();
    log_startup_info();

    match cli.command {
        Command::Run(args) => run_pipeline(args).await,
        Command::NodeTypes => {
            for node_type in demo::registry().node_types() {
                println!("{node_type}");
            }
            Ok(())
        }
    }
}

/// Runs the demonstration pipeline `args.runs` times against one cache.
async fn run_pipeline(args: RunArgs) -> anyhow::Result<()> {
    let config = args.engine.to_config()?;
    tracing::info!(
        target: TRACING_TARGET_CONFIG,
        worker_pool_size = config.worker_pool_size,
        allow_incomplete = config.allow_incomplete,
        failure_policy = %config.failure_policy,
        runs = args.runs,
        "engine configuration"
    );

    let registry = demo::registry();
    let (graph, result_node) =
        demo::pipeline(&registry, &args.demo).context("failed to build pipeline")?;
    let cache = args.cache.build();
    let engine = Engine::new(config);

    let cancel = CancellationToken::new();
    let signal = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let mut failed = false;
    for _ in 0..args.runs {
        let report = engine.run(&graph, &cache, cancel.clone()).await;
        report::write_report(&mut std::io::stdout().lock(), &report, result_node, args.format)
            .context("failed to write report")?;
        failed |= !report.is_success();
        if cancel.is_cancelled() {
            break;
        }
    }
    signal.abort();

    let stats = cache.stats();
    tracing::info!(
        target: TRACING_TARGET_SHUTDOWN,
        entries = stats.entries,
        rows = stats.rows,
        hits = stats.hits,
        misses = stats.misses,
        "cache statistics"
    );

    anyhow::ensure!(!failed, "pipeline run did not complete");
    Ok(())
}

/// Cancels `token` on the first interrupt signal.
async fn cancel_on_ctrl_c(token: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %err,
            "failed to listen for interrupt signal"
        );
        return;
    }
    tracing::warn!(
        target: TRACING_TARGET_SHUTDOWN,
        "interrupt received, cancelling run"
    );
    token.cancel();
}

/// Logs startup information.
fn log_startup_info() {
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        "starting strata"
    );

    tracing::debug!(
        target: TRACING_TARGET_STARTUP,
        pid = process::id(),
        arch = std::env::consts::ARCH,
        os = std::env::consts::OS,
        features = ?enabled_features(),
        "build information"
    );
}

/// Returns a list of enabled compile-time features.
fn enabled_features() -> Vec<&'static str> {
    [cfg!(feature = "dotenv").then_some("dotenv")]
        .into_iter()
        .flatten()
        .collect()
}

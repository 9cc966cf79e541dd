//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── log_format: LogFormat
//! └── command
//!     ├── run
//!     │   ├── engine: EngineArgs   # Workers, incomplete steps, failure policy
//!     │   ├── cache: CacheArgs     # Payload directory, resident row budget
//!     │   └── demo: DemoArgs       # Shape of the demonstration pipeline
//!     └── node-types
//! ```
//!
//! All options can be provided via CLI arguments or environment variables.

mod cache;
mod engine;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use cache::CacheArgs;
pub use engine::EngineArgs;

use crate::demo::DemoArgs;

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "strata")]
#[command(about = "Run strata pipeline graphs")]
#[command(version)]
pub struct Cli {
    /// Log output format.
    #[arg(
        long,
        env = "STRATA_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text,
        global = true
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the demonstration pipeline and print the report.
    Run(RunArgs),
    /// List the registered node types.
    NodeTypes,
}

/// Arguments of `strata run`.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub cache: CacheArgs,

    #[command(flatten)]
    pub demo: DemoArgs,

    /// How often to run the pipeline against the same cache.
    #[arg(long, env = "STRATA_RUNS", default_value_t = 1)]
    pub runs: usize,

    /// Report output format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Table)]
    pub format: ReportFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Run report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Table,
    Json,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    ///
    /// Logs go to stderr so reports on stdout stay machine-readable.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);

        match self.log_format {
            LogFormat::Text => registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "strata",
            "run",
            "--workers",
            "2",
            "--collect-errors",
            "--runs",
            "2",
            "--format",
            "json",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.engine.workers, Some(2));
        assert!(args.engine.collect_errors);
        assert_eq!(args.runs, 2);
        assert_eq!(args.format, ReportFormat::Json);
    }
}

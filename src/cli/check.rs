//! `stampede check <graph>`

use std::path::Path;

use clap::Args;
use stampede::config::{LogLevel, StampedeConfig};
use stampede::graph::{Graph, GraphStatus, RunOptions, EXIT_CONFIG_ERROR};
use stampede::logging::init_logging;
use stampede::program::{load_program, read_program, validate_program, DiagnosticLevel};

use super::parse_log_level;

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Program file path, or a name registered in the configuration
    pub graph: String,

    #[arg(long, value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,
}

/// Validates the program, plans the graph and runs only its Validate stages.
pub async fn run(config_path: &Path, args: CheckArgs) -> anyhow::Result<i32> {
    let config = StampedeConfig::load(config_path)?;
    let mut logging = config.logging.clone();
    if let Some(level) = args.log_level {
        logging.log_level = level;
    }
    let _guard = init_logging(&logging)?;

    let path = config.resolve_graph(&args.graph)?;
    let program = read_program(&path)?;
    let report = validate_program(&program);
    for diagnostic in &report.diagnostics {
        let label = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
        };
        println!("{label}: {diagnostic}");
    }
    if !report.is_valid {
        return Ok(EXIT_CONFIG_ERROR);
    }

    let graph = Graph::new(load_program(&program)?)?;
    let generations = graph.plan().generations.len();
    let outcome = graph
        .execute(RunOptions::default().with_pool_size(1).validate_only(true))
        .await;
    match outcome.status {
        GraphStatus::Complete => {
            println!(
                "{}: OK ({} stages in {} generations)",
                graph.name(),
                graph.plan().stage_count(),
                generations
            );
            Ok(0)
        }
        status => {
            if let Some(error) = &outcome.error {
                println!("{}: {status}: {}", graph.name(), error.summary());
            }
            Ok(status.exit_code())
        }
    }
}

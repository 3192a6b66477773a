//! `stampede run <graph>`

use std::path::Path;

use anyhow::Context;
use clap::Args;
use stampede::config::{LogLevel, RunOverrides, RunSettings, StampedeConfig};
use stampede::core::{create_event_channel, EventEmitter, EventReceiver, GraphEvent};
use stampede::graph::{Graph, RunOptions};
use stampede::logging::init_logging;
use stampede::program::load_program_file;

use super::parse_log_level;
use super::summary::{render_summary, write_latest};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Program file path, or a name registered in the configuration
    pub graph: String,

    /// Worker pool size (defaults to the number of CPUs)
    #[arg(long)]
    pub cpus: Option<usize>,

    /// Comma-separated stages that pass their history through without running
    #[arg(long)]
    pub skip: Option<String>,

    /// trace, debug, info, warn, error or critical
    #[arg(long, value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,

    /// Directory for stampede.log and latest.json
    #[arg(long)]
    pub logfiles_directory: Option<std::path::PathBuf>,

    /// Skip connection validation in Setup stages
    #[arg(long)]
    pub bypass_connection_validation: bool,

    /// Connection validation attempts per action
    #[arg(long)]
    pub connection_validation_retries: Option<u32>,

    /// Summaries to print: stages, actions, checks, metrics or all
    #[arg(long, value_delimiter = ',')]
    pub show_summaries: Vec<String>,

    /// Summaries to suppress
    #[arg(long, value_delimiter = ',')]
    pub hide_summaries: Vec<String>,

    /// Write the final metrics to latest.json in the logfiles directory
    #[arg(long)]
    pub enable_latest: bool,
}

impl RunArgs {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            cpus: self.cpus,
            skip: self.skip.clone(),
            log_level: self.log_level,
            logfiles_directory: self.logfiles_directory.clone(),
            bypass_connection_validation: self.bypass_connection_validation,
            connection_validation_retries: self.connection_validation_retries,
            show_summaries: self.show_summaries.clone(),
            hide_summaries: self.hide_summaries.clone(),
            enable_latest: self.enable_latest,
        }
    }
}

pub async fn run(config_path: &Path, args: RunArgs) -> anyhow::Result<i32> {
    let config = StampedeConfig::load(config_path)?;
    let settings = RunSettings::resolve(&config, args.overrides())?;
    let _guard = init_logging(&settings.logging).context("failed to initialize logging")?;

    let path = config.resolve_graph(&args.graph)?;
    let builder = load_program_file(&path)
        .with_context(|| format!("failed to load graph '{}'", args.graph))?
        .skip(settings.skip.clone());
    let graph = Graph::new(builder)?;
    tracing::info!(
        graph = %graph.name(),
        path = %path.display(),
        workers = settings.pool_size,
        "Starting run"
    );

    let (tx, rx) = create_event_channel();
    let progress = tokio::spawn(print_progress(rx));
    let options = RunOptions::default()
        .with_pool_size(settings.pool_size)
        .with_core(settings.core.clone())
        .with_events(EventEmitter::new(tx))
        .handle_signals(true);
    let outcome = graph.execute(options).await;
    // the emitter is dropped with the run, which ends the progress task
    let _ = progress.await;

    print!("{}", render_summary(&outcome, &settings.summaries));
    if settings.enable_latest {
        let latest = write_latest(&settings.logging.logfiles_directory, &outcome).await?;
        tracing::info!(path = %latest.display(), "Wrote latest metrics");
    }
    if let Some(error) = &outcome.error {
        eprintln!("{}", error.summary());
        for cause in &error.causes {
            eprintln!("  caused by: {cause}");
        }
    }
    Ok(outcome.exit_code())
}

async fn print_progress(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            GraphEvent::GenerationStarted { index, stages, .. } => {
                println!("generation {}: {}", index + 1, stages.join(", "));
            }
            GraphEvent::StageSkipped { stage, .. } => println!("  {stage}: skipped"),
            GraphEvent::StageCompleted {
                stage, elapsed_ms, ..
            } => println!("  {stage}: done in {elapsed_ms}ms"),
            GraphEvent::StageFailed { stage, error, .. } => {
                println!("  {stage}: failed ({})", error.summary())
            }
            GraphEvent::GraphFinished { graph, status, .. } => println!("{graph}: {status}"),
            GraphEvent::GraphStarted { .. } | GraphEvent::StageStarted { .. } => {}
        }
    }
}

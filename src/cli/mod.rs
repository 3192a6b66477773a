//! Command-line interface of the `stampede` binary.
//!
//! - [`run`] - Run a graph program end to end
//! - [`check`] - Validate a program and run only its Validate stages
//! - [`ping`] - Issue one request through an engine
//! - [`graph`] - Graph registry management (discover, list)
//! - [`summary`] - End-of-run summaries and `latest.json`

pub mod check;
pub mod graph;
pub mod ping;
pub mod run;
pub mod summary;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stampede::config::{LogLevel, CONFIG_FILE_NAME};
use stampede::error::{ConfigError, GraphError};
use stampede::graph::EXIT_CONFIG_ERROR;

#[derive(Debug, Parser)]
#[command(name = "stampede")]
#[command(version, about = "Graph execution runtime for distributed load testing", long_about = None)]
pub struct Cli {
    /// Path of the stampede configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a graph program
    Run(run::RunArgs),

    /// Validate a graph program without sending load
    Check(check::CheckArgs),

    /// Send a single request to a target
    Ping(ping::PingArgs),

    /// Manage the graph registry
    #[command(subcommand)]
    Graph(graph::GraphCommands),
}

/// Runs the selected command and returns the process exit code.
pub async fn execute(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Run(args) => run::run(&cli.config, args).await,
        Commands::Check(args) => check::run(&cli.config, args).await,
        Commands::Ping(args) => ping::run(args).await,
        Commands::Graph(command) => graph::run(&cli.config, command),
    }
}

/// Configuration and program errors exit with 2, everything else with 1.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    let config_error = err
        .chain()
        .any(|cause| cause.is::<GraphError>() || cause.is::<ConfigError>());
    if config_error {
        EXIT_CONFIG_ERROR
    } else {
        1
    }
}

/// Prints the error followed by its cause chain.
pub fn report_error(err: &anyhow::Error) {
    eprintln!("Error: {err}");
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

pub(crate) fn parse_log_level(raw: &str) -> Result<LogLevel, ConfigError> {
    raw.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "stampede",
            "run",
            "smoke",
            "--cpus",
            "4",
            "--skip",
            "load,analyze",
            "--log-level",
            "debug",
            "--show-summaries",
            "actions,checks",
            "--enable-latest",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.graph, "smoke");
        assert_eq!(args.cpus, Some(4));
        assert_eq!(args.skip.as_deref(), Some("load,analyze"));
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(args.enable_latest);
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        assert!(Cli::try_parse_from(["stampede", "run", "g", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let err = anyhow::Error::new(GraphError::Program("bad".into())).context("loading smoke");
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_ERROR);
        let err = anyhow::anyhow!("socket closed");
        assert_eq!(exit_code_for(&err), 1);
    }
}

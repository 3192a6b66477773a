//! `stampede graph ...` registry commands.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use stampede::config::StampedeConfig;
use stampede::program::discover_programs;

#[derive(Debug, Subcommand)]
pub enum GraphCommands {
    /// Scan a directory for program files and register them by name
    Discover {
        /// Directory to scan recursively
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// List registered graphs
    List,
}

pub fn run(config_path: &Path, command: GraphCommands) -> anyhow::Result<i32> {
    match command {
        GraphCommands::Discover { path } => run_discover(config_path, &path),
        GraphCommands::List => run_list(config_path),
    }
}

fn run_discover(config_path: &Path, root: &Path) -> anyhow::Result<i32> {
    let mut config = StampedeConfig::load(config_path)?;
    let found = discover_programs(root)?;
    for (name, path) in &found {
        println!("{:<24} {}", name, path.display());
    }
    let changed = config.register_graphs(found);
    if changed > 0 {
        config.save(config_path)?;
    }
    println!("{changed} graph(s) registered in {}", config_path.display());
    Ok(0)
}

fn run_list(config_path: &Path) -> anyhow::Result<i32> {
    let config = StampedeConfig::load(config_path)?;
    if config.graphs.is_empty() {
        println!("No graphs registered; run `stampede graph discover <path>`");
    }
    for (name, path) in &config.graphs {
        println!("{:<24} {}", name, path.display());
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_registers_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let programs = dir.path().join("graphs");
        std::fs::create_dir_all(&programs).unwrap();
        std::fs::write(
            programs.join("smoke.yaml"),
            "name: smoke\nstages:\n  - name: a\n    type: setup\n",
        )
        .unwrap();
        let config_path = dir.path().join("stampede.toml");

        assert_eq!(run_discover(&config_path, &programs).unwrap(), 0);
        let config = StampedeConfig::load(&config_path).unwrap();
        assert!(config.graphs["smoke"].ends_with("smoke.yaml"));

        // a second scan changes nothing
        let before = std::fs::read_to_string(&config_path).unwrap();
        run_discover(&config_path, &programs).unwrap();
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), before);
    }
}

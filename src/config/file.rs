use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "stampede.toml";

/// Log verbosity accepted in configuration and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    pub bypass_connection_validation: bool,
    pub connection_validation_retries: u32,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            bypass_connection_validation: false,
            connection_validation_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub logfiles_directory: PathBuf,
    pub log_level: LogLevel,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            logfiles_directory: PathBuf::from("logs"),
            log_level: LogLevel::Info,
        }
    }
}

/// Contents of `stampede.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampedeConfig {
    pub graphs: BTreeMap<String, PathBuf>,
    pub core: CoreSettings,
    pub logging: LoggingSettings,
}

impl StampedeConfig {
    /// Loads `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Resolves a graph argument: an existing file path wins over a registry name.
    pub fn resolve_graph(&self, graph: &str) -> Result<PathBuf, ConfigError> {
        let direct = PathBuf::from(graph);
        if direct.is_file() {
            return Ok(direct);
        }
        self.graphs
            .get(graph)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownGraph(graph.to_string()))
    }

    /// Adds or replaces registry entries, returning how many changed.
    pub fn register_graphs(&mut self, graphs: BTreeMap<String, PathBuf>) -> usize {
        let mut changed = 0;
        for (name, path) in graphs {
            if self.graphs.get(&name) != Some(&path) {
                self.graphs.insert(name, path);
                changed += 1;
            }
        }
        changed
    }
}

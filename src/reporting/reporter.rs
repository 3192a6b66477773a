use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::json::JsonFileReporter;
use super::memory::MemoryReporter;
use super::metrics::MetricsSet;
use super::stdout::StdoutReporter;
use crate::engines::ActionResult;
use crate::error::ReporterError;
use crate::plugins::PluginRegistry;

/// Sink for a run's metrics and raw results.
///
/// A Submit stage calls `connect`, `submit_metrics`, `submit_results` once per
/// executed stage, then `close`.
#[async_trait]
pub trait Reporter: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), ReporterError>;

    async fn submit_metrics(&self, metrics: &MetricsSet) -> Result<(), ReporterError>;

    async fn submit_results(&self, stage: &str, results: &[ActionResult]) -> Result<(), ReporterError>;

    async fn close(&self) -> Result<(), ReporterError>;
}

/// Reporter declaration on a Submit stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReporterConfig {
    Memory,
    Json { path: PathBuf },
    Stdout,
    /// A reporter registered under `name` in the plugin registry.
    Plugin { name: String },
}

impl ReporterConfig {
    pub fn label(&self) -> String {
        match self {
            ReporterConfig::Memory => "memory".to_string(),
            ReporterConfig::Json { path } => format!("json:{}", path.display()),
            ReporterConfig::Stdout => "stdout".to_string(),
            ReporterConfig::Plugin { name } => name.clone(),
        }
    }
}

pub fn create_reporter(
    config: &ReporterConfig,
    plugins: &PluginRegistry,
) -> Result<Arc<dyn Reporter>, ReporterError> {
    match config {
        ReporterConfig::Memory => Ok(Arc::new(MemoryReporter::new())),
        ReporterConfig::Json { path } => Ok(Arc::new(JsonFileReporter::new(path.clone()))),
        ReporterConfig::Stdout => Ok(Arc::new(StdoutReporter::new())),
        ReporterConfig::Plugin { name } => plugins
            .reporter(name)
            .ok_or_else(|| ReporterError::UnknownPlugin(name.clone())),
    }
}

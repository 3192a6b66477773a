use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use super::metrics::MetricsSet;
use super::reporter::Reporter;
use crate::engines::ActionResult;
use crate::error::ReporterError;

#[derive(Debug, Default, Serialize)]
struct JsonDocument {
    metrics: Option<MetricsSet>,
    results: BTreeMap<String, Vec<ActionResult>>,
}

/// Buffers a run's output and writes it as one JSON document on `close`.
#[derive(Debug)]
pub struct JsonFileReporter {
    path: PathBuf,
    document: Mutex<Option<JsonDocument>>,
}

impl JsonFileReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn failed(&self, message: impl std::fmt::Display) -> ReporterError {
        ReporterError::Submit {
            reporter: format!("json:{}", self.path.display()),
            message: message.to_string(),
        }
    }

    fn not_connected(&self) -> ReporterError {
        ReporterError::NotConnected {
            reporter: format!("json:{}", self.path.display()),
        }
    }
}

#[async_trait]
impl Reporter for JsonFileReporter {
    fn name(&self) -> &str {
        "json"
    }

    async fn connect(&self) -> Result<(), ReporterError> {
        *self.document.lock() = Some(JsonDocument::default());
        Ok(())
    }

    async fn submit_metrics(&self, metrics: &MetricsSet) -> Result<(), ReporterError> {
        let mut document = self.document.lock();
        let document = document.as_mut().ok_or_else(|| self.not_connected())?;
        document.metrics = Some(metrics.clone());
        Ok(())
    }

    async fn submit_results(&self, stage: &str, results: &[ActionResult]) -> Result<(), ReporterError> {
        let mut document = self.document.lock();
        let document = document.as_mut().ok_or_else(|| self.not_connected())?;
        document
            .results
            .entry(stage.to_string())
            .or_default()
            .extend_from_slice(results);
        Ok(())
    }

    async fn close(&self) -> Result<(), ReporterError> {
        let Some(document) = self.document.lock().take() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&document).map_err(|e| self.failed(e))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.failed(e))?;
        }
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| self.failed(e))?;
        tracing::debug!(path = %self.path.display(), "Wrote JSON report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::EngineType;

    #[tokio::test]
    async fn test_writes_document_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let reporter = JsonFileReporter::new(&path);

        reporter.connect().await.unwrap();
        reporter.submit_metrics(&MetricsSet::default()).await.unwrap();
        reporter
            .submit_results("load", &[ActionResult::new("home", EngineType::Http)])
            .await
            .unwrap();
        assert!(!path.exists());
        reporter.close().await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["results"]["load"][0]["name"], "home");
        assert!(written["metrics"]["stages"].is_object());

        // a second close has nothing buffered
        reporter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_requires_connect() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = JsonFileReporter::new(dir.path().join("run.json"));
        let err = reporter.submit_metrics(&MetricsSet::default()).await.unwrap_err();
        assert!(matches!(err, ReporterError::NotConnected { .. }));
    }
}

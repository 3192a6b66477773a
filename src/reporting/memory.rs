use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::metrics::MetricsSet;
use super::reporter::Reporter;
use crate::engines::ActionResult;
use crate::error::ReporterError;

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    closed: bool,
    metrics: Vec<MetricsSet>,
    results: BTreeMap<String, Vec<ActionResult>>,
}

/// Keeps everything it is sent. Clones share the same storage, so a handle
/// kept by the caller sees what a Submit stage wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every metrics set submitted, oldest first.
    pub fn metrics(&self) -> Vec<MetricsSet> {
        self.state.lock().metrics.clone()
    }

    pub fn latest_metrics(&self) -> Option<MetricsSet> {
        self.state.lock().metrics.last().cloned()
    }

    pub fn results(&self, stage: &str) -> Vec<ActionResult> {
        self.state.lock().results.get(stage).cloned().unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl Reporter for MemoryReporter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<(), ReporterError> {
        let mut state = self.state.lock();
        state.connected = true;
        state.closed = false;
        Ok(())
    }

    async fn submit_metrics(&self, metrics: &MetricsSet) -> Result<(), ReporterError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(ReporterError::NotConnected {
                reporter: "memory".into(),
            });
        }
        state.metrics.push(metrics.clone());
        Ok(())
    }

    async fn submit_results(&self, stage: &str, results: &[ActionResult]) -> Result<(), ReporterError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(ReporterError::NotConnected {
                reporter: "memory".into(),
            });
        }
        state
            .results
            .entry(stage.to_string())
            .or_default()
            .extend_from_slice(results);
        Ok(())
    }

    async fn close(&self) -> Result<(), ReporterError> {
        let mut state = self.state.lock();
        state.connected = false;
        state.closed = true;
        Ok(())
    }
}

use std::fmt::Write as _;

use async_trait::async_trait;

use super::metrics::{MetricsSet, StageMetrics};
use super::reporter::Reporter;
use crate::engines::ActionResult;
use crate::error::ReporterError;

/// Prints a metrics table when metrics are submitted. Raw results are not printed.
#[derive(Debug, Default)]
pub struct StdoutReporter;

impl StdoutReporter {
    pub fn new() -> Self {
        Self
    }
}

pub fn render_stage_line(metrics: &StageMetrics) -> String {
    format!(
        "{:<24} total={:<8} ok={:<8} failed={:<8} checks_failed={:<6} rps={:<10.2} p50={:.2}ms p95={:.2}ms p99={:.2}ms",
        metrics.stage,
        metrics.total,
        metrics.succeeded,
        metrics.failed,
        metrics.check_failures,
        metrics.rps,
        metrics.latency.median,
        metrics.latency.p95,
        metrics.latency.p99,
    )
}

pub fn render_metrics(metrics: &MetricsSet) -> String {
    let mut out = String::new();
    for stage in metrics.stages.values() {
        let _ = writeln!(out, "{}", render_stage_line(stage));
        for (name, value) in &stage.custom {
            let _ = writeln!(out, "  {}.{} = {}", stage.stage, name, value);
        }
    }
    out
}

#[async_trait]
impl Reporter for StdoutReporter {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn connect(&self) -> Result<(), ReporterError> {
        Ok(())
    }

    async fn submit_metrics(&self, metrics: &MetricsSet) -> Result<(), ReporterError> {
        print!("{}", render_metrics(metrics));
        Ok(())
    }

    async fn submit_results(&self, _stage: &str, _results: &[ActionResult]) -> Result<(), ReporterError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ReporterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_render_includes_custom_metrics() {
        let mut stage = StageMetrics::aggregate("load", &[], Duration::from_secs(1));
        stage.custom.insert("error_rate".into(), 0.25);
        let mut set = MetricsSet::default();
        set.insert(stage);

        let rendered = render_metrics(&set);
        assert!(rendered.starts_with("load"));
        assert!(rendered.contains("total=0"));
        assert!(rendered.contains("load.error_rate = 0.25"));
    }
}

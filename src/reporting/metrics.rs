//! Aggregation of action results into per-stage and per-action metrics.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engines::ActionResult;

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencySummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ActionResult>) -> Self {
        let mut samples: Vec<f64> = results
            .into_iter()
            .map(|r| r.elapsed().as_secs_f64() * 1_000.0)
            .collect();
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(|a, b| a.total_cmp(b));
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        Self {
            min: samples[0],
            max: samples[samples.len() - 1],
            mean,
            median: quantile(&samples, 0.5),
            p90: quantile(&samples, 0.9),
            p95: quantile(&samples, 0.95),
            p99: quantile(&samples, 0.99),
        }
    }
}

/// Nearest-rank quantile over sorted samples.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionMetrics {
    pub name: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed check count per check name.
    pub check_failures: BTreeMap<String, usize>,
    /// Result count per response status.
    pub statuses: BTreeMap<u16, usize>,
    pub latency: LatencySummary,
}

impl ActionMetrics {
    fn from_results(name: &str, results: &[&ActionResult]) -> Self {
        let mut metrics = ActionMetrics {
            name: name.to_string(),
            total: results.len(),
            latency: LatencySummary::from_results(results.iter().copied()),
            ..Default::default()
        };
        for result in results {
            if result.success() {
                metrics.succeeded += 1;
            } else {
                metrics.failed += 1;
            }
            if let Some(status) = result.status {
                *metrics.statuses.entry(status).or_default() += 1;
            }
            for check in result.failed_checks() {
                *metrics.check_failures.entry(check.name.clone()).or_default() += 1;
            }
        }
        metrics
    }

    pub fn total_check_failures(&self) -> usize {
        self.check_failures.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub check_failures: usize,
    pub elapsed_secs: f64,
    /// Completed results per second of stage run time.
    pub rps: f64,
    pub latency: LatencySummary,
    pub actions: BTreeMap<String, ActionMetrics>,
    /// Values returned by `@metric` hooks, by hook name.
    pub custom: BTreeMap<String, f64>,
}

impl StageMetrics {
    pub fn aggregate(stage: &str, results: &[ActionResult], elapsed: Duration) -> Self {
        let mut by_action: BTreeMap<&str, Vec<&ActionResult>> = BTreeMap::new();
        for result in results {
            by_action.entry(result.name.as_str()).or_default().push(result);
        }
        let actions: BTreeMap<String, ActionMetrics> = by_action
            .into_iter()
            .map(|(name, group)| (name.to_string(), ActionMetrics::from_results(name, &group)))
            .collect();

        let succeeded = actions.values().map(|a| a.succeeded).sum();
        let elapsed_secs = elapsed.as_secs_f64();
        Self {
            stage: stage.to_string(),
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            check_failures: actions.values().map(|a| a.total_check_failures()).sum(),
            elapsed_secs,
            rps: if elapsed_secs > 0.0 {
                results.len() as f64 / elapsed_secs
            } else {
                0.0
            },
            latency: LatencySummary::from_results(results),
            actions,
            custom: BTreeMap::new(),
        }
    }
}

/// Metrics for every Execute stage of a run, keyed by stage name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSet {
    pub stages: BTreeMap<String, StageMetrics>,
}

impl MetricsSet {
    pub fn insert(&mut self, metrics: StageMetrics) {
        self.stages.insert(metrics.stage.clone(), metrics);
    }

    pub fn stage(&self, name: &str) -> Option<&StageMetrics> {
        self.stages.get(name)
    }

    pub fn total(&self) -> usize {
        self.stages.values().map(|s| s.total).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.stages.values().map(|s| s.succeeded).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

//! End-of-run summaries and the `latest.json` snapshot.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use stampede::config::{SummaryKind, SummarySelection};
use stampede::error::ErrorReport;
use stampede::graph::{GraphOutcome, GraphStatus};
use stampede::reporting::{render_metrics, MetricsSet};

pub const LATEST_FILE_NAME: &str = "latest.json";

pub fn render_summary(outcome: &GraphOutcome, selection: &SummarySelection) -> String {
    let mut out = String::new();
    for kind in selection.shown() {
        match kind {
            SummaryKind::Stages => render_stages(outcome, &mut out),
            SummaryKind::Actions => render_actions(outcome.metrics.as_ref(), &mut out),
            SummaryKind::Checks => render_checks(outcome.metrics.as_ref(), &mut out),
            SummaryKind::Metrics => {
                if let Some(metrics) = &outcome.metrics {
                    let _ = writeln!(out, "== metrics ==");
                    out.push_str(&render_metrics(metrics));
                }
            }
        }
    }
    out
}

fn render_stages(outcome: &GraphOutcome, out: &mut String) {
    let _ = writeln!(
        out,
        "== stages ({} {} in {:.2}s) ==",
        outcome.graph,
        outcome.status,
        outcome.elapsed.as_secs_f64()
    );
    for (name, machine) in &outcome.states {
        let _ = writeln!(out, "{:<24} {}", name, machine.state());
    }
}

fn render_actions(metrics: Option<&MetricsSet>, out: &mut String) {
    let Some(metrics) = metrics else {
        return;
    };
    let _ = writeln!(out, "== actions ==");
    for stage in metrics.stages.values() {
        for action in stage.actions.values() {
            let statuses: Vec<String> = action
                .statuses
                .iter()
                .map(|(status, count)| format!("{status}x{count}"))
                .collect();
            let _ = writeln!(
                out,
                "{}.{:<20} total={:<8} ok={:<8} failed={:<8} p50={:.2}ms p99={:.2}ms statuses=[{}]",
                stage.stage,
                action.name,
                action.total,
                action.succeeded,
                action.failed,
                action.latency.median,
                action.latency.p99,
                statuses.join(" ")
            );
        }
    }
}

fn render_checks(metrics: Option<&MetricsSet>, out: &mut String) {
    let Some(metrics) = metrics else {
        return;
    };
    let _ = writeln!(out, "== checks ==");
    for stage in metrics.stages.values() {
        for action in stage.actions.values() {
            for (check, failures) in &action.check_failures {
                let _ = writeln!(
                    out,
                    "{}.{}.{}: {} of {} failed",
                    stage.stage, action.name, check, failures, action.total
                );
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct LatestRun<'a> {
    graph: &'a str,
    graph_id: String,
    status: GraphStatus,
    elapsed_ms: u128,
    finished_at: chrono::DateTime<chrono::Utc>,
    error: Option<&'a ErrorReport>,
    metrics: Option<&'a MetricsSet>,
}

/// Writes the outcome's metrics to `<dir>/latest.json`, replacing any previous run.
pub async fn write_latest(dir: &Path, outcome: &GraphOutcome) -> anyhow::Result<PathBuf> {
    let latest = LatestRun {
        graph: &outcome.graph,
        graph_id: outcome.graph_id.to_string(),
        status: outcome.status,
        elapsed_ms: outcome.elapsed.as_millis(),
        finished_at: chrono::Utc::now(),
        error: outcome.error.as_ref(),
        metrics: outcome.metrics.as_ref(),
    };
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(LATEST_FILE_NAME);
    let tmp = dir.join(format!("{LATEST_FILE_NAME}.tmp"));
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(&latest)?).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(path)
}

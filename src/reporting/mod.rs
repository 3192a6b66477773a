//! Metrics aggregation and the reporter sinks a Submit stage writes to.

pub mod json;
pub mod memory;
pub mod metrics;
pub mod reporter;
pub mod stdout;

pub use json::JsonFileReporter;
pub use memory::MemoryReporter;
pub use metrics::{quantile, ActionMetrics, LatencySummary, MetricsSet, StageMetrics};
pub use reporter::{create_reporter, Reporter, ReporterConfig};
pub use stdout::{render_metrics, render_stage_line, StdoutReporter};

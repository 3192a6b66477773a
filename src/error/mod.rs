//! Error types for the graph runtime.
//!
//! - [`GraphError`] - Planning and program errors, raised before any stage runs.
//! - [`StageError`] - Runtime errors raised while a stage executes.
//! - [`HookError`] / [`EngineError`] / [`ReporterError`] - Errors from user hooks, protocol engines and reporters.
//! - [`ErrorKind`] / [`ErrorReport`] - The stable error taxonomy and its structured form.

pub mod error_kind;
pub mod graph_error;
pub mod runtime_error;
pub mod stage_error;

pub use error_kind::{ErrorKind, ErrorReport};
pub use graph_error::GraphError;
pub use runtime_error::{CheckpointError, ConfigError, EngineError, HookError, ReporterError};
pub use stage_error::StageError;

/// Convenience alias for planning results.
pub type GraphResult<T> = Result<T, GraphError>;
/// Convenience alias for stage-level results.
pub type StageResult<T> = Result<T, StageError>;

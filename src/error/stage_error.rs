//! Runtime errors raised while a stage runs.

use std::time::Duration;

use thiserror::Error;

use super::error_kind::error_chain;
use super::{ErrorKind, ErrorReport};
use crate::stages::StageState;

/// Errors raised by a stage's `run()` and routed into the Error edge.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("Stage {stage} timed out after {timeout:?}")]
    Timeout { stage: String, timeout: Duration },
    #[error("Hooks {hooks:?} in stage {stage} timed out after {timeout:?}")]
    HookTimeout {
        stage: String,
        hooks: Vec<String>,
        timeout: Duration,
    },
    #[error("Stage {stage} failed: {message}")]
    Execution {
        stage: String,
        message: String,
        causes: Vec<String>,
    },
    #[error("Connection validation for {stage}.{action} failed after {attempts} attempt(s): {reason}")]
    ConnectionValidation {
        stage: String,
        action: String,
        attempts: u32,
        reason: String,
    },
    #[error("Worker for stage {stage} was killed: {reason}")]
    ProcessKilled { stage: String, reason: String },
    #[error("Stage {stage} requires history key '{key}' which no predecessor provided")]
    MissingRequirement { stage: String, key: String },
    #[error("Stage {stage} cannot move from {from} to {to}")]
    InvalidState {
        stage: String,
        from: StageState,
        to: StageState,
    },
    #[error("Stage {stage} was cancelled")]
    Cancelled { stage: String },
}

impl StageError {
    /// Wraps any error raised inside `run()`, keeping its cause chain.
    pub fn execution(stage: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        StageError::Execution {
            stage: stage.into(),
            message: err.to_string(),
            causes: error_chain(err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Timeout { .. } | StageError::HookTimeout { .. } => ErrorKind::StageTimeout,
            StageError::Execution { .. }
            | StageError::MissingRequirement { .. }
            | StageError::InvalidState { .. } => ErrorKind::StageExecution,
            StageError::ConnectionValidation { .. } => ErrorKind::ConnectionValidation,
            StageError::ProcessKilled { .. } => ErrorKind::ProcessKilled,
            StageError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn stage(&self) -> &str {
        match self {
            StageError::Timeout { stage, .. }
            | StageError::HookTimeout { stage, .. }
            | StageError::Execution { stage, .. }
            | StageError::ConnectionValidation { stage, .. }
            | StageError::ProcessKilled { stage, .. }
            | StageError::MissingRequirement { stage, .. }
            | StageError::InvalidState { stage, .. }
            | StageError::Cancelled { stage } => stage,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let causes = match self {
            StageError::Execution { causes, .. } => causes.clone(),
            _ => Vec::new(),
        };
        ErrorReport::new(self.kind(), self.to_string())
            .with_stages(vec![self.stage().to_string()])
            .with_causes(causes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;

    #[test]
    fn test_timeout_classification() {
        let err = StageError::Timeout {
            stage: "load".into(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(err.kind(), ErrorKind::StageTimeout);
        assert_eq!(err.stage(), "load");
        assert_eq!(err.to_string(), "Stage load timed out after 1s");

        let err = StageError::HookTimeout {
            stage: "load".into(),
            hooks: vec!["Load.slow".into()],
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.kind(), ErrorKind::StageTimeout);
    }

    #[test]
    fn test_execution_keeps_cause_chain() {
        let hook_err = HookError::Checkpoint(crate::error::CheckpointError::Storage("disk full".into()));
        let err = StageError::execution("save", &hook_err);
        assert_eq!(err.kind(), ErrorKind::StageExecution);
        let report = err.report();
        assert_eq!(report.stages, vec!["save".to_string()]);
        assert_eq!(report.causes, vec!["Storage error: disk full".to_string()]);
    }

    #[test]
    fn test_connection_validation_display() {
        let err = StageError::ConnectionValidation {
            stage: "setup".into(),
            action: "health".into(),
            attempts: 3,
            reason: "connection refused".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ConnectionValidation);
        assert_eq!(
            err.to_string(),
            "Connection validation for setup.health failed after 3 attempt(s): connection refused"
        );
    }
}

//! Planning-time errors.

use thiserror::Error;

use super::{ErrorKind, ErrorReport};
use crate::stages::StageType;

/// Errors raised while assembling, validating or planning a graph.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error(
        "Invalid transition from {source_stage} ({source_type}) to {destination_stage} ({destination_type})"
    )]
    InvalidTransition {
        source_stage: String,
        source_type: StageType,
        destination_stage: String,
        destination_type: StageType,
    },
    #[error("Isolated stage(s) with no dependencies or dependents: {}", .0.join(", "))]
    IsolatedStage(Vec<String>),
    #[error("Cycle detected between stages: {}", .0.join(", "))]
    CycleDetected(Vec<String>),
    #[error("Stage {stage} depends on unknown stage {dependency}")]
    UnknownDependency { stage: String, dependency: String },
    #[error("Hook validation failed for {stage}.{hook}: {reason}")]
    HookValidation {
        stage: String,
        hook: String,
        reason: String,
    },
    #[error("Stage {stage} overrides reserved method '{method}'")]
    ReservedMethod { stage: String, method: String },
    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),
    #[error("Stage not found: {0}")]
    StageNotFound(String),
    #[error("Graph '{0}' declares no stages")]
    EmptyGraph(String),
    #[error("Invalid stage configuration for {stage}: {reason}")]
    InvalidStage { stage: String, reason: String },
    #[error("Program error: {0}")]
    Program(String),
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::InvalidTransition { .. }
            | GraphError::CycleDetected(_)
            | GraphError::UnknownDependency { .. } => ErrorKind::InvalidTransition,
            GraphError::IsolatedStage(_) => ErrorKind::IsolatedStage,
            GraphError::HookValidation { .. } => ErrorKind::HookValidation,
            GraphError::ReservedMethod { .. } => ErrorKind::ReservedMethod,
            GraphError::DuplicateStage(_)
            | GraphError::StageNotFound(_)
            | GraphError::EmptyGraph(_)
            | GraphError::InvalidStage { .. }
            | GraphError::Program(_) => ErrorKind::Configuration,
        }
    }

    /// The stage(s) the error is attributed to.
    pub fn stages(&self) -> Vec<String> {
        match self {
            GraphError::InvalidTransition {
                source_stage,
                destination_stage,
                ..
            } => vec![source_stage.clone(), destination_stage.clone()],
            GraphError::IsolatedStage(stages) | GraphError::CycleDetected(stages) => stages.clone(),
            GraphError::UnknownDependency { stage, .. }
            | GraphError::HookValidation { stage, .. }
            | GraphError::ReservedMethod { stage, .. }
            | GraphError::InvalidStage { stage, .. } => vec![stage.clone()],
            GraphError::DuplicateStage(stage) | GraphError::StageNotFound(stage) => {
                vec![stage.clone()]
            }
            GraphError::EmptyGraph(_) | GraphError::Program(_) => Vec::new(),
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.kind(), self.to_string()).with_stages(self.stages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_display() {
        let err = GraphError::InvalidTransition {
            source_stage: "analyze".into(),
            source_type: StageType::Analyze,
            destination_stage: "load".into(),
            destination_type: StageType::Execute,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition from analyze (Analyze) to load (Execute)"
        );
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(err.stages(), vec!["analyze".to_string(), "load".to_string()]);
    }

    #[test]
    fn test_isolated_stage_report() {
        let err = GraphError::IsolatedStage(vec!["rogue".into()]);
        let report = err.report();
        assert_eq!(report.kind, ErrorKind::IsolatedStage);
        assert_eq!(report.stages, vec!["rogue".to_string()]);
        assert!(report.message.contains("rogue"));
    }

    #[test]
    fn test_reserved_method_kind() {
        let err = GraphError::ReservedMethod {
            stage: "setup".into(),
            method: "run".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ReservedMethod);
        assert_eq!(err.to_string(), "Stage setup overrides reserved method 'run'");
    }
}

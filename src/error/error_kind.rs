use std::fmt;

use serde::{Deserialize, Serialize};

/// Error classification code shared by the planner, the stages and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Planning
    InvalidTransition,
    IsolatedStage,
    HookValidation,
    ReservedMethod,
    Configuration,

    // Runtime
    StageTimeout,
    StageExecution,
    ConnectionValidation,
    ProcessKilled,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
            ErrorKind::IsolatedStage => "ISOLATED_STAGE",
            ErrorKind::HookValidation => "HOOK_VALIDATION",
            ErrorKind::ReservedMethod => "RESERVED_METHOD",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::StageTimeout => "STAGE_TIMEOUT",
            ErrorKind::StageExecution => "STAGE_EXECUTION",
            ErrorKind::ConnectionValidation => "CONNECTION_VALIDATION",
            ErrorKind::ProcessKilled => "PROCESS_KILLED",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// Planning and configuration errors abort before any stage runs.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidTransition
                | ErrorKind::IsolatedStage
                | ErrorKind::HookValidation
                | ErrorKind::ReservedMethod
                | ErrorKind::Configuration
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error record written to logs, events and `latest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            stages: Vec::new(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_causes(mut self, causes: Vec<String>) -> Self {
        self.causes = causes;
        self
    }

    /// Single-line summary in the form `KIND [stage, ...]: message`.
    pub fn summary(&self) -> String {
        if self.stages.is_empty() {
            format!("{}: {}", self.kind, self.message)
        } else {
            format!("{} [{}]: {}", self.kind, self.stages.join(", "), self.message)
        }
    }
}

/// Collects the `source()` chain of an error into display strings.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes
}

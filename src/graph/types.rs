use std::fmt;

use serde::{Deserialize, Serialize};

/// Exit code for configuration and validation errors.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Lifecycle of a whole graph run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphStatus {
    Initialized,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl GraphStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GraphStatus::Complete | GraphStatus::Failed | GraphStatus::Cancelled
        )
    }

    /// Process exit code for a finished run.
    pub fn exit_code(&self) -> i32 {
        match self {
            GraphStatus::Complete => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for GraphStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GraphStatus::Initialized => "INITIALIZED",
            GraphStatus::Running => "RUNNING",
            GraphStatus::Complete => "COMPLETE",
            GraphStatus::Failed => "FAILED",
            GraphStatus::Cancelled => "CANCELLED",
        })
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::state::StageState;
use crate::error::GraphError;

/// Kind of a stage in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Idle,
    Setup,
    Optimize,
    Execute,
    Analyze,
    Checkpoint,
    Teardown,
    Submit,
    Validate,
    Wait,
    Complete,
    Error,
}

impl StageType {
    pub const ALL: [StageType; 12] = [
        StageType::Idle,
        StageType::Setup,
        StageType::Optimize,
        StageType::Execute,
        StageType::Analyze,
        StageType::Checkpoint,
        StageType::Teardown,
        StageType::Submit,
        StageType::Validate,
        StageType::Wait,
        StageType::Complete,
        StageType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Idle => "Idle",
            StageType::Setup => "Setup",
            StageType::Optimize => "Optimize",
            StageType::Execute => "Execute",
            StageType::Analyze => "Analyze",
            StageType::Checkpoint => "Checkpoint",
            StageType::Teardown => "Teardown",
            StageType::Submit => "Submit",
            StageType::Validate => "Validate",
            StageType::Wait => "Wait",
            StageType::Complete => "Complete",
            StageType::Error => "Error",
        }
    }

    /// Types that sit between core stages without constraining the transition table.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            StageType::Validate | StageType::Checkpoint | StageType::Wait | StageType::Teardown
        )
    }

    /// The `(working, done)` lifecycle states a stage of this type passes
    /// through before `Complete`. Types without their own phase have none.
    pub fn lifecycle_states(&self) -> Option<(StageState, StageState)> {
        match self {
            StageType::Validate => Some((StageState::Validating, StageState::Validated)),
            StageType::Setup => Some((StageState::SettingUp, StageState::Setup)),
            StageType::Optimize => Some((StageState::Optimizing, StageState::Optimized)),
            StageType::Execute => Some((StageState::Executing, StageState::Executed)),
            StageType::Analyze => Some((StageState::Analyzing, StageState::Analyzed)),
            StageType::Checkpoint => Some((StageState::Checkpointing, StageState::Checkpointed)),
            StageType::Submit => Some((StageState::Submitting, StageState::Submitted)),
            StageType::Teardown => Some((
                StageState::TeardownInitialized,
                StageState::TeardownComplete,
            )),
            StageType::Idle | StageType::Wait | StageType::Complete | StageType::Error => None,
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| GraphError::Program(format!("unknown stage type '{}'", s)))
    }
}

/// Worker allocation priority of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePriority {
    Low,
    Normal,
    High,
    Exclusive,
    #[default]
    Auto,
}

impl StagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagePriority::Low => "low",
            StagePriority::Normal => "normal",
            StagePriority::High => "high",
            StagePriority::Exclusive => "exclusive",
            StagePriority::Auto => "auto",
        }
    }

    /// Admissible worker range `[min, max]` for a pool of `pool_size` workers.
    pub fn worker_range(&self, pool_size: usize) -> (usize, usize) {
        let pool = pool_size.max(1);
        let quarter = pool.div_ceil(4);
        let three_quarters = (3 * pool).div_ceil(4);
        match self {
            StagePriority::Low => (1, quarter),
            StagePriority::Normal => (quarter, three_quarters),
            StagePriority::High => (three_quarters, pool),
            StagePriority::Exclusive => (pool, pool),
            StagePriority::Auto => (1, pool),
        }
    }
}

impl fmt::Display for StagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StagePriority {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(StagePriority::Low),
            "normal" => Ok(StagePriority::Normal),
            "high" => Ok(StagePriority::High),
            "exclusive" => Ok(StagePriority::Exclusive),
            "auto" => Ok(StagePriority::Auto),
            other => Err(GraphError::Program(format!("unknown priority '{}'", other))),
        }
    }
}

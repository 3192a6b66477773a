//! Stage declarations and the behavior of each stage type.

pub mod analyze;
pub mod catalog;
pub mod execute;
pub mod lifecycle;
pub mod optimize;
pub mod run;
pub mod setup;
pub mod stage;
pub mod state;
pub mod submit;
pub mod types;

pub use catalog::StageCatalog;
pub use execute::split_batch;
pub use lifecycle::ERROR_REPORT;
pub use run::{
    merge_worker_outputs, run_stage, StageBehavior, StageBehaviorRegistry, StageEnv, StageInput, StageRun,
};
pub use stage::{Stage, StageBuilder, StageConfig};
pub use state::{is_monotone_path, StageState, StageStateMachine};
pub use types::{StagePriority, StageType};

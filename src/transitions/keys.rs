//! History keys stages provide and require by default.

use crate::stages::StageType;

pub const SETUP_ACTIONS: &str = "setup_actions";
/// Entry of `setup_actions` holding the Setup stage's own actions, shared
/// between every Execute it feeds.
pub const SHARED_ACTIONS: &str = "__shared__";
pub const OPTIMIZED_PARAMS: &str = "optimized_params";
pub const EXECUTE_RESULTS: &str = "execute_results";
pub const ANALYZE_METRICS: &str = "analyze_metrics";
pub const VALIDATION: &str = "validation";

pub fn default_provides(stage_type: StageType) -> &'static [&'static str] {
    match stage_type {
        StageType::Setup => &[SETUP_ACTIONS],
        StageType::Optimize => &[OPTIMIZED_PARAMS],
        StageType::Execute => &[EXECUTE_RESULTS],
        StageType::Analyze => &[ANALYZE_METRICS],
        StageType::Validate => &[VALIDATION],
        _ => &[],
    }
}

pub fn default_requires(stage_type: StageType) -> &'static [&'static str] {
    match stage_type {
        StageType::Optimize | StageType::Execute => &[SETUP_ACTIONS],
        StageType::Analyze => &[EXECUTE_RESULTS],
        StageType::Submit => &[ANALYZE_METRICS],
        _ => &[],
    }
}

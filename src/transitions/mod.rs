//! Which stage types may follow which, and how history moves along an edge.

pub mod edge;
pub mod keys;
pub mod table;

pub use edge::Edge;
pub use keys::{
    default_provides, default_requires, ANALYZE_METRICS, EXECUTE_RESULTS, OPTIMIZED_PARAMS,
    SETUP_ACTIONS, SHARED_ACTIONS, VALIDATION,
};
pub use table::{is_valid_transition, transition_rule, TransitionRule};

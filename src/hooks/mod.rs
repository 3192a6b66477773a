//! Hooks as values, their process-wide registry and their validation rules.

pub mod registry;
pub mod types;
pub mod validation;

pub use registry::HookRegistry;
pub use types::{
    AfterFn, BeforeFn, CheckFn, Hook, HookArgs, HookCall, HookFuture, HookType, MetricFn, ValueFn,
};
pub use validation::{validate_stage_hooks, HookDiagnostic, HookReport, RESERVED_METHODS};

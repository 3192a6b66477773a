//! Stage graphs: declaration, assembly, planning and execution.
//!
//! A [`GraphBuilder`] collects stage declarations and assembles them into a
//! complete graph (implicit Idle, Validate, Analyze, Submit, Complete and
//! Error stages included). [`plan`] turns the assembled graph into
//! generations, and [`Graph::run`] drives those generations on a worker pool.

pub mod builder;
pub mod planner;
pub mod runner;
pub mod types;

pub use builder::{AssembledGraph, GraphBuilder, ERROR_STAGE};
pub use planner::{plan, ExecutionPlan};
pub use runner::{Graph, GraphHandle, GraphOutcome, RunOptions};
pub use types::{GraphStatus, EXIT_CONFIG_ERROR};

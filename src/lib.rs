//! # Stampede: a graph execution runtime for load testing
//!
//! `stampede` runs load-test programs expressed as directed acyclic graphs of
//! typed stages (setup, execute, optimize, analyze, submit, checkpoint, ...).
//! It plans an execution schedule, spreads stages over a pool of OS worker
//! threads, drives protocol engines at high concurrency and aggregates
//! per-request telemetry into metrics handed to reporters.
//!
//! - **Stages and transitions**: a static transition table decides which
//!   stage types may follow which; edges carry context history forward.
//! - **Hooks**: each stage owns a sub-DAG of hooks (actions, tasks, checks,
//!   transforms, channels, ...) scheduled by the event dispatcher.
//! - **Engines**: an HTTP/1.1 and a UDP engine over tokio sockets, GraphQL
//!   over HTTP, plus HTTP/2 settings, flow-control and HPACK state machines.
//! - **Personas**: closed-loop load generators (default, sequence, weighted,
//!   approximate distribution).
//! - **Programs**: declarative YAML/JSON/TOML graphs with checks, personas and
//!   reporters.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use stampede::engines::Action;
//! use stampede::graph::{Graph, GraphBuilder, RunOptions};
//! use stampede::hooks::Hook;
//! use stampede::stages::{StageBuilder, StageType};
//!
//! #[tokio::main]
//! async fn main() {
//!     let builder = GraphBuilder::new("smoke")
//!         .register(StageBuilder::new("prepare", StageType::Setup).build())
//!         .register(
//!             StageBuilder::new("load", StageType::Execute)
//!                 .depends_on(&["prepare"])
//!                 .hook(Hook::action(
//!                     "health",
//!                     Action::http("health", "GET", "http://127.0.0.1:8080/health"),
//!                 ))
//!                 .build(),
//!         );
//!     let graph = Graph::new(builder).unwrap();
//!     let outcome = graph.execute(RunOptions::default()).await;
//!     println!("{:?}", outcome.status);
//! }
//! ```

pub mod config;
pub mod core;
pub mod dispatcher;
pub mod engines;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hooks;
pub mod logging;
pub mod optimizer;
pub mod personas;
pub mod plugins;
pub mod program;
pub mod reporting;
pub mod stages;
pub mod transitions;

pub use crate::config::{RunOverrides, RunSettings, StampedeConfig};
pub use crate::core::{ContextValue, GraphEvent, ShutdownSignal};
pub use crate::engines::{Action, ActionResult, EngineType};
pub use crate::error::{ErrorKind, GraphError, GraphResult, StageError, StageResult};
pub use crate::graph::{Graph, GraphBuilder, GraphHandle, GraphOutcome, GraphStatus, RunOptions};
pub use crate::hooks::{Hook, HookType};
pub use crate::personas::{PersonaConfig, PersonaType};
pub use crate::plugins::PluginRegistry;
pub use crate::program::{load_program, load_program_file, parse_program, ProgramFormat};
pub use crate::reporting::{MetricsSet, Reporter, ReporterConfig};
pub use crate::stages::{StageBuilder, StagePriority, StageType};

//! Declarative graph programs: YAML/JSON/TOML files describing stages,
//! actions, checks, personas and reporters.
//!
//! A file is parsed into a [`ProgramSchema`], validated into a
//! [`ProgramReport`], then loaded into a [`GraphBuilder`](crate::graph::GraphBuilder).

pub mod checks;
pub mod discover;
pub mod loader;
pub mod parser;
pub mod schema;
pub mod validator;

pub use checks::CheckSpec;
pub use discover::discover_programs;
pub use loader::{load_program, load_program_file};
pub use parser::{parse_program, read_program, ProgramFormat};
pub use schema::*;
pub use validator::{
    validate_program, validate_program_source, DiagnosticLevel, ProgramDiagnostic, ProgramReport,
};

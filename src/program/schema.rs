//! Serde model of a declarative graph program.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::checks::CheckSpec;
use crate::engines::EngineType;
use crate::optimizer::OptimizerConfig;
use crate::personas::PersonaConfig;
use crate::reporting::ReporterConfig;
use crate::stages::StagePriority;

fn default_true() -> bool {
    true
}

fn default_engine() -> EngineType {
    EngineType::Http
}

fn default_method() -> String {
    "GET".to_string()
}

/// A whole program file: a graph name plus its stage declarations.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ProgramSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub stages: Vec<StageSchema>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct StageSchema {
    pub name: String,
    /// Stage type name, case-insensitive (`setup`, `Execute`, ...).
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub priority: StagePriority,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_true")]
    pub allow_parallel: bool,
    #[serde(default)]
    pub skip: bool,
    #[serde(default, with = "crate::config::duration::serde_option_duration")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "crate::config::duration::serde_option_duration")]
    pub hook_timeout: Option<Duration>,
    #[serde(default)]
    pub persona: Option<PersonaConfig>,
    #[serde(default)]
    pub reporters: Vec<ReporterConfig>,
    #[serde(default, with = "crate::config::duration::serde_option_duration")]
    pub wait: Option<Duration>,
    #[serde(default)]
    pub optimizer: Option<OptimizerConfig>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ActionSchema>,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointSchema>,
}

/// One request an Execute (or Setup/Optimize) stage issues.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ActionSchema {
    pub name: String,
    #[serde(default = "default_engine")]
    pub engine: EngineType,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// GraphQL document; turns the action into a JSON POST.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default, with = "crate::config::duration::serde_option_duration")]
    pub connect_timeout: Option<Duration>,
    #[serde(default, with = "crate::config::duration::serde_option_duration")]
    pub total_timeout: Option<Duration>,
    #[serde(default)]
    pub redirects: Option<u32>,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
}

/// Save or load of a context key on a Checkpoint stage.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    Save,
    Load,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSchema {
    pub name: String,
    pub mode: CheckpointMode,
    pub key: String,
    pub path: String,
}

//! Structural validation of a parsed program, before any stage is built.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::parser::{parse_program, ProgramFormat};
use super::schema::{ProgramSchema, StageSchema};
use crate::engines::EngineType;
use crate::stages::StageType;

/// Severity level of a program diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// A single program finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDiagnostic {
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    pub stage: Option<String>,
    pub field_path: Option<String>,
}

impl ProgramDiagnostic {
    fn error(code: &str, stage: Option<&str>, field_path: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            code: code.to_string(),
            message: message.into(),
            stage: stage.map(str::to_string),
            field_path,
        }
    }

    fn warning(code: &str, stage: Option<&str>, field_path: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            ..Self::error(code, stage, field_path, message)
        }
    }
}

impl std::fmt::Display for ProgramDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(path) = &self.field_path {
            write!(f, " (at {path})")?;
        }
        Ok(())
    }
}

/// Aggregated result of program validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramReport {
    pub is_valid: bool,
    pub diagnostics: Vec<ProgramDiagnostic>,
}

impl ProgramReport {
    fn from_diagnostics(diagnostics: Vec<ProgramDiagnostic>) -> Self {
        let is_valid = diagnostics.iter().all(|d| d.level != DiagnosticLevel::Error);
        Self { is_valid, diagnostics }
    }

    pub fn errors(&self) -> Vec<&ProgramDiagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ProgramDiagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
            .collect()
    }
}

/// Parses then validates; a parse failure is reported as `E001`.
pub fn validate_program_source(content: &str, format: ProgramFormat) -> ProgramReport {
    match parse_program(content, format) {
        Ok(program) => validate_program(&program),
        Err(err) => ProgramReport::from_diagnostics(vec![ProgramDiagnostic::error(
            "E001",
            None,
            None,
            err.to_string(),
        )]),
    }
}

pub fn validate_program(program: &ProgramSchema) -> ProgramReport {
    let mut diagnostics = Vec::new();

    if program.name.trim().is_empty() {
        diagnostics.push(ProgramDiagnostic::error("E002", None, Some("name".into()), "program name is empty"));
    }
    if program.stages.is_empty() {
        diagnostics.push(ProgramDiagnostic::error(
            "E002",
            None,
            Some("stages".into()),
            format!("program '{}' declares no stages", program.name),
        ));
    }

    let mut names = HashSet::new();
    for (index, stage) in program.stages.iter().enumerate() {
        if !names.insert(stage.name.as_str()) {
            diagnostics.push(ProgramDiagnostic::error(
                "E003",
                Some(&stage.name),
                Some(format!("stages[{index}].name")),
                format!("stage '{}' is declared more than once", stage.name),
            ));
        }
    }

    for (index, stage) in program.stages.iter().enumerate() {
        for dependency in &stage.depends {
            if !names.contains(dependency.as_str()) {
                diagnostics.push(ProgramDiagnostic::error(
                    "E005",
                    Some(&stage.name),
                    Some(format!("stages[{index}].depends")),
                    format!("stage '{}' depends on unknown stage '{}'", stage.name, dependency),
                ));
            }
        }
        match stage.stage_type.parse::<StageType>() {
            Ok(StageType::Error) => diagnostics.push(ProgramDiagnostic::error(
                "E004",
                Some(&stage.name),
                Some(format!("stages[{index}].type")),
                "Error stages are created by the runtime",
            )),
            Ok(stage_type) => validate_stage(index, stage, stage_type, &mut diagnostics),
            Err(_) => diagnostics.push(ProgramDiagnostic::error(
                "E004",
                Some(&stage.name),
                Some(format!("stages[{index}].type")),
                format!("unknown stage type '{}'", stage.stage_type),
            )),
        }
    }

    ProgramReport::from_diagnostics(diagnostics)
}

fn validate_stage(index: usize, stage: &StageSchema, stage_type: StageType, out: &mut Vec<ProgramDiagnostic>) {
    let name = Some(stage.name.as_str());
    let hosts_actions = matches!(
        stage_type,
        StageType::Setup | StageType::Execute | StageType::Optimize
    );

    if !stage.actions.is_empty() && !hosts_actions {
        out.push(ProgramDiagnostic::error(
            "E006",
            name,
            Some(format!("stages[{index}].actions")),
            format!("{stage_type} stages cannot declare actions"),
        ));
    }
    if stage_type == StageType::Execute && stage.actions.is_empty() {
        out.push(ProgramDiagnostic::warning(
            "W002",
            name,
            Some(format!("stages[{index}].actions")),
            "Execute stage declares no actions and will issue no requests",
        ));
    }

    let mut action_names = BTreeSet::new();
    for (a, action) in stage.actions.iter().enumerate() {
        let path = format!("stages[{index}].actions[{a}]");
        if !action_names.insert(action.name.as_str()) {
            out.push(ProgramDiagnostic::error(
                "E008",
                name,
                Some(format!("{path}.name")),
                format!("action '{}' is declared more than once", action.name),
            ));
        }
        if let Err(err) = url::Url::parse(&action.url) {
            out.push(ProgramDiagnostic::error(
                "E007",
                name,
                Some(format!("{path}.url")),
                format!("action '{}' has invalid url '{}': {err}", action.name, action.url),
            ));
        }
        if !matches!(
            action.engine,
            EngineType::Http | EngineType::Graphql | EngineType::Udp | EngineType::Task
        ) {
            out.push(ProgramDiagnostic::warning(
                "W004",
                name,
                Some(format!("{path}.engine")),
                format!("engine '{}' has no wire implementation; attempts will fail", action.engine.as_str()),
            ));
        }
    }

    if !stage.checkpoints.is_empty() && stage_type != StageType::Checkpoint {
        out.push(ProgramDiagnostic::error(
            "E009",
            name,
            Some(format!("stages[{index}].checkpoints")),
            "only Checkpoint stages can save or load checkpoints",
        ));
    }
    if stage.optimizer.is_some() && stage_type != StageType::Optimize {
        out.push(ProgramDiagnostic::warning(
            "W003",
            name,
            Some(format!("stages[{index}].optimizer")),
            "optimizer is ignored outside Optimize stages",
        ));
    }
    if !stage.reporters.is_empty() && stage_type != StageType::Submit {
        out.push(ProgramDiagnostic::warning(
            "W001",
            name,
            Some(format!("stages[{index}].reporters")),
            "reporters are ignored outside Submit stages",
        ));
    }
    if stage.wait.is_some() && stage_type != StageType::Wait {
        out.push(ProgramDiagnostic::warning(
            "W005",
            name,
            Some(format!("stages[{index}].wait")),
            "wait is ignored outside Wait stages",
        ));
    }
}

//! Turns a validated [`ProgramSchema`] into a [`GraphBuilder`].

use std::path::Path;

use super::parser::read_program;
use super::schema::{ActionSchema, CheckpointMode, ProgramSchema, StageSchema};
use super::validator::validate_program;
use crate::engines::{Action, ActionTimeouts, EngineType};
use crate::error::{GraphError, GraphResult};
use crate::graph::GraphBuilder;
use crate::hooks::Hook;
use crate::stages::{Stage, StageBuilder, StageType};

/// Builds the graph declared by `program`. Warnings are logged; the first
/// error aborts the load.
pub fn load_program(program: &ProgramSchema) -> GraphResult<GraphBuilder> {
    let report = validate_program(program);
    for warning in report.warnings() {
        tracing::warn!(
            graph = %program.name,
            stage = warning.stage.as_deref().unwrap_or("-"),
            "{}",
            warning
        );
    }
    if let Some(error) = report.errors().first() {
        return Err(GraphError::Program(error.to_string()));
    }

    let mut builder = GraphBuilder::new(&program.name);
    for stage in &program.stages {
        builder.add(build_stage(stage)?);
    }
    tracing::debug!(graph = %program.name, stages = program.stages.len(), "Program loaded");
    Ok(builder)
}

pub fn load_program_file(path: impl AsRef<Path>) -> GraphResult<GraphBuilder> {
    load_program(&read_program(path)?)
}

fn build_stage(schema: &StageSchema) -> GraphResult<Stage> {
    let stage_type: StageType = schema.stage_type.parse()?;
    let depends: Vec<&str> = schema.depends.iter().map(String::as_str).collect();

    let mut builder = StageBuilder::new(&schema.name, stage_type)
        .depends_on(&depends)
        .priority(schema.priority)
        .allow_parallel(schema.allow_parallel);
    if let Some(workers) = schema.workers {
        builder = builder.workers(workers);
    }
    if let Some(timeout) = schema.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(timeout) = schema.hook_timeout {
        builder = builder.hook_timeout(timeout);
    }
    if let Some(persona) = &schema.persona {
        builder = builder.persona(persona.clone());
    }
    for reporter in &schema.reporters {
        builder = builder.reporter(reporter.clone());
    }
    if let Some(wait) = schema.wait {
        builder = builder.wait(wait);
    }
    if let Some(optimizer) = &schema.optimizer {
        builder = builder.optimizer(optimizer.clone());
    }
    for key in &schema.requires {
        builder = builder.requires(key);
    }
    for key in &schema.provides {
        builder = builder.provides(key);
    }

    for action in &schema.actions {
        let mut hook = Hook::action(&action.name, build_action(action));
        if let Some(order) = action.order {
            hook = hook.order(order);
        }
        builder = builder.hook(hook);
        for (index, check) in action.checks.iter().enumerate() {
            builder = builder.hook(check.to_hook(&action.name, index));
        }
    }
    for checkpoint in &schema.checkpoints {
        let hook = match checkpoint.mode {
            CheckpointMode::Save => Hook::save(&checkpoint.name, &checkpoint.key, &checkpoint.path),
            CheckpointMode::Load => Hook::load(&checkpoint.name, &checkpoint.key, &checkpoint.path),
        };
        builder = builder.hook(hook);
    }

    let mut stage = builder.build();
    stage.config.skip = schema.skip;
    Ok(stage)
}

fn build_action(schema: &ActionSchema) -> Action {
    let mut action = match &schema.query {
        Some(query) => {
            let mut action = Action::graphql(&schema.name, &schema.url, query, schema.variables.clone());
            if schema.engine != EngineType::Http {
                action.engine = schema.engine;
            }
            action
        }
        None => {
            let mut action = Action::new(&schema.name, schema.engine, &schema.url).with_method(&schema.method);
            if let Some(body) = &schema.body {
                action = action.with_body(body);
            }
            action
        }
    };
    for (name, value) in &schema.headers {
        action = action.with_header(name, value);
    }
    if let Some(weight) = schema.weight {
        action = action.with_weight(weight);
    }
    if schema.connect_timeout.is_some() || schema.total_timeout.is_some() {
        let defaults = ActionTimeouts::default();
        action = action.with_timeouts(
            schema.connect_timeout.unwrap_or(defaults.connect_timeout),
            schema.total_timeout.unwrap_or(defaults.total_timeout),
        );
    }
    if let Some(redirects) = schema.redirects {
        action = action.with_redirects(redirects);
    }
    action
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::hooks::{validate_stage_hooks, HookRegistry};
use crate::stages::{Stage, StageBuilder, StageCatalog, StageConfig, StageType};

/// Name of the stage that receives the failure report when a run fails.
pub const ERROR_STAGE: &str = "error";

/// Collects stage declarations and assembles them into a complete graph.
///
/// ```rust
/// use stampede::graph::GraphBuilder;
/// use stampede::stages::{StageBuilder, StageType};
///
/// let graph = GraphBuilder::new("smoke")
///     .register(StageBuilder::new("prepare", StageType::Setup).build())
///     .register(
///         StageBuilder::new("load", StageType::Execute)
///             .depends_on(&["prepare"])
///             .build(),
///     )
///     .assemble()
///     .unwrap();
/// assert!(graph.catalog.config("complete").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    name: String,
    stages: Vec<Stage>,
    skip: BTreeSet<String>,
}

/// A graph with its synthetic stages inserted and its hooks validated.
#[derive(Debug, Clone)]
pub struct AssembledGraph {
    pub name: String,
    pub catalog: Arc<StageCatalog>,
    /// Names of the stages the user declared, in declaration order.
    pub declared: Vec<String>,
    /// Stage that receives failures; not part of the plan.
    pub error_stage: String,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn add(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Marks stages that pass their history through without running.
    pub fn skip<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Inserts, when absent, an Idle source, a Validate right after the Idle
    /// stages, an Analyze and a Submit after the last Execute stages, and a
    /// Complete sink. Each inserted stage depends on the sinks present when
    /// it is inserted.
    pub fn assemble(self) -> GraphResult<AssembledGraph> {
        if self.stages.is_empty() {
            return Err(GraphError::EmptyGraph(self.name));
        }

        let mut names = BTreeSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name().to_string()) {
                return Err(GraphError::DuplicateStage(stage.name().to_string()));
            }
            if stage.stage_type() == StageType::Error {
                return Err(GraphError::InvalidStage {
                    stage: stage.name().to_string(),
                    reason: "Error stages are created by the runtime".to_string(),
                });
            }
        }
        for name in &self.skip {
            if !names.contains(name) {
                return Err(GraphError::StageNotFound(name.clone()));
            }
        }
        for stage in &self.stages {
            for dependency in &stage.config.dependencies {
                if !names.contains(dependency) {
                    return Err(GraphError::UnknownDependency {
                        stage: stage.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
            validate_stage_hooks(stage.name(), stage.stage_type(), &stage.hooks).into_result()?;
        }

        let declared: Vec<String> = self.stages.iter().map(|s| s.name().to_string()).collect();
        let mut stages: BTreeMap<String, Stage> = self
            .stages
            .into_iter()
            .map(|mut stage| {
                stage.config.skip |= self.skip.contains(stage.name());
                (stage.name().to_string(), stage)
            })
            .collect();

        let has = |stages: &BTreeMap<String, Stage>, stage_type: StageType| {
            stages.values().any(|s| s.stage_type() == stage_type)
        };

        if !has(&stages, StageType::Idle) {
            let sources = sources(&stages);
            let idle = unique_name(&stages, "idle");
            if !has(&stages, StageType::Validate) {
                let validate = unique_name(&stages, "validate");
                for source in &sources {
                    depend(&mut stages, source, &validate);
                }
                insert(&mut stages, &validate, StageType::Validate, &[idle.clone()]);
            } else {
                for source in &sources {
                    depend(&mut stages, source, &idle);
                }
            }
            insert(&mut stages, &idle, StageType::Idle, &[]);
        } else if !has(&stages, StageType::Validate) {
            let idles: Vec<String> = stages
                .values()
                .filter(|s| s.stage_type() == StageType::Idle)
                .map(|s| s.name().to_string())
                .collect();
            let validate = unique_name(&stages, "validate");
            for stage in stages.values_mut() {
                let dependencies = &mut stage.config.dependencies;
                if dependencies.iter().any(|d| idles.contains(d)) {
                    dependencies.retain(|d| !idles.contains(d));
                    dependencies.insert(0, validate.clone());
                }
            }
            insert(&mut stages, &validate, StageType::Validate, &idles);
        }

        if has(&stages, StageType::Execute) && !has(&stages, StageType::Analyze) {
            let sinks = sinks(&stages);
            let analyze = unique_name(&stages, "analyze");
            insert(&mut stages, &analyze, StageType::Analyze, &sinks);
        }
        if has(&stages, StageType::Analyze) && !has(&stages, StageType::Submit) {
            let sinks = sinks(&stages);
            let submit = unique_name(&stages, "submit");
            insert(&mut stages, &submit, StageType::Submit, &sinks);
        }
        if !has(&stages, StageType::Complete) {
            let sinks = sinks(&stages);
            let complete = unique_name(&stages, "complete");
            insert(&mut stages, &complete, StageType::Complete, &sinks);
        }

        let error_stage = unique_name(&stages, ERROR_STAGE);
        insert(&mut stages, &error_stage, StageType::Error, &[]);

        let mut hooks = HookRegistry::new();
        let mut configs = Vec::with_capacity(stages.len());
        for (name, stage) in stages {
            hooks.register_stage(&name, stage.hooks)?;
            configs.push(stage.config);
        }
        tracing::debug!(graph = %self.name, stages = configs.len(), "Graph assembled");

        Ok(AssembledGraph {
            name: self.name,
            catalog: Arc::new(StageCatalog::new(configs, hooks)),
            declared,
            error_stage,
        })
    }
}

fn sources(stages: &BTreeMap<String, Stage>) -> Vec<String> {
    stages
        .values()
        .filter(|s| s.config.dependencies.is_empty())
        .map(|s| s.name().to_string())
        .collect()
}

fn sinks(stages: &BTreeMap<String, Stage>) -> Vec<String> {
    let depended: BTreeSet<&str> = stages
        .values()
        .flat_map(|s| s.config.dependencies.iter().map(String::as_str))
        .collect();
    stages
        .values()
        .filter(|s| s.stage_type() != StageType::Error && !depended.contains(s.name()))
        .map(|s| s.name().to_string())
        .collect()
}

fn depend(stages: &mut BTreeMap<String, Stage>, stage: &str, on: &str) {
    if let Some(stage) = stages.get_mut(stage) {
        if !stage.config.dependencies.iter().any(|d| d == on) {
            stage.config.dependencies.insert(0, on.to_string());
        }
    }
}

fn insert(stages: &mut BTreeMap<String, Stage>, name: &str, stage_type: StageType, dependencies: &[String]) {
    let mut config = StageConfig::new(name, stage_type);
    config.dependencies = dependencies.to_vec();
    config.synthetic = true;
    stages.insert(name.to_string(), StageBuilder::from_config(config).build());
}

fn unique_name(stages: &BTreeMap<String, Stage>, base: &str) -> String {
    if !stages.contains_key(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !stages.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

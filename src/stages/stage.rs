use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{StagePriority, StageType};
use crate::hooks::Hook;
use crate::optimizer::OptimizerConfig;
use crate::personas::PersonaConfig;
use crate::reporting::ReporterConfig;
use crate::transitions::{default_provides, default_requires};

fn default_true() -> bool {
    true
}

/// Everything about a stage except its hooks. Crosses the worker boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub stage_type: StageType,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: StagePriority,
    /// Declared worker count; `None` lets the planner choose.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_true")]
    pub allow_parallel: bool,
    #[serde(default)]
    pub skip: bool,
    #[serde(default, with = "crate::config::duration::serde_option_duration")]
    pub timeout: Option<Duration>,
    /// Caps the time spent dispatching the stage's hooks.
    #[serde(default, with = "crate::config::duration::serde_option_duration")]
    pub hook_timeout: Option<Duration>,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub reporters: Vec<ReporterConfig>,
    /// Sleep length of a Wait stage.
    #[serde(default, with = "crate::config::duration::serde_option_duration")]
    pub wait: Option<Duration>,
    #[serde(default)]
    pub optimizer: Option<OptimizerConfig>,
    /// Keys required on top of the type's defaults.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Context keys provided on top of the type's defaults.
    #[serde(default)]
    pub provides: Vec<String>,
    /// Inserted by graph assembly rather than declared.
    #[serde(default)]
    pub synthetic: bool,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, stage_type: StageType) -> Self {
        Self {
            name: name.into(),
            stage_type,
            dependencies: Vec::new(),
            priority: StagePriority::default(),
            workers: None,
            allow_parallel: true,
            skip: false,
            timeout: None,
            hook_timeout: None,
            persona: PersonaConfig::default(),
            reporters: Vec::new(),
            wait: None,
            optimizer: None,
            requires: Vec::new(),
            provides: Vec::new(),
            synthetic: false,
        }
    }

    pub fn requires_keys(&self) -> Vec<String> {
        merge_keys(default_requires(self.stage_type), &self.requires)
    }

    pub fn provides_keys(&self) -> Vec<String> {
        merge_keys(default_provides(self.stage_type), &self.provides)
    }
}

fn merge_keys(defaults: &[&str], extra: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = defaults.iter().map(|k| k.to_string()).collect();
    for key in extra {
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}

/// A stage declaration: its configuration plus its hooks.
#[derive(Debug, Clone)]
pub struct Stage {
    pub config: StageConfig,
    pub hooks: Vec<Hook>,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stage_type(&self) -> StageType {
        self.config.stage_type
    }
}

/// Fluent construction of a [`Stage`] for `GraphBuilder::register`.
#[derive(Debug, Clone)]
pub struct StageBuilder {
    stage: Stage,
}

impl StageBuilder {
    pub fn new(name: impl Into<String>, stage_type: StageType) -> Self {
        Self {
            stage: Stage {
                config: StageConfig::new(name, stage_type),
                hooks: Vec::new(),
            },
        }
    }

    pub fn from_config(config: StageConfig) -> Self {
        Self {
            stage: Stage {
                config,
                hooks: Vec::new(),
            },
        }
    }

    pub fn depends_on(mut self, stages: &[&str]) -> Self {
        for stage in stages {
            if !self.stage.config.dependencies.iter().any(|d| d == stage) {
                self.stage.config.dependencies.push(stage.to_string());
            }
        }
        self
    }

    pub fn priority(mut self, priority: StagePriority) -> Self {
        self.stage.config.priority = priority;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.stage.config.workers = Some(workers);
        self
    }

    pub fn allow_parallel(mut self, allow: bool) -> Self {
        self.stage.config.allow_parallel = allow;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.stage.config.timeout = Some(timeout);
        self
    }

    pub fn hook_timeout(mut self, timeout: Duration) -> Self {
        self.stage.config.hook_timeout = Some(timeout);
        self
    }

    pub fn persona(mut self, persona: PersonaConfig) -> Self {
        self.stage.config.persona = persona;
        self
    }

    pub fn reporter(mut self, reporter: ReporterConfig) -> Self {
        self.stage.config.reporters.push(reporter);
        self
    }

    pub fn wait(mut self, duration: Duration) -> Self {
        self.stage.config.wait = Some(duration);
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.stage.config.optimizer = Some(optimizer);
        self
    }

    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.stage.config.requires.push(key.into());
        self
    }

    pub fn provides(mut self, key: impl Into<String>) -> Self {
        self.stage.config.provides.push(key.into());
        self
    }

    pub fn hook(mut self, hook: Hook) -> Self {
        self.stage.hooks.push(hook);
        self
    }

    pub fn hooks(mut self, hooks: impl IntoIterator<Item = Hook>) -> Self {
        self.stage.hooks.extend(hooks);
        self
    }

    pub fn build(self) -> Stage {
        self.stage
    }
}

//! Running one stage: hooks, type-specific behavior, timeout and cancellation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::catalog::StageCatalog;
use super::stage::StageConfig;
use super::types::StageType;
use crate::config::CoreSettings;
use crate::core::{CheckpointStore, ContextValue, MemoryCheckpointStore, RuntimeContext, ShutdownSignal, StageContext};
use crate::dispatcher::EventDispatcher;
use crate::error::StageError;
use crate::hooks::{Hook, HookType};
use crate::personas::PersonaOutput;
use crate::plugins::PluginRegistry;
use crate::transitions::EXECUTE_RESULTS;

/// Extra time past the shutdown grace period before a stage is abandoned.
const CANCEL_MARGIN: Duration = Duration::from_millis(250);

/// What a stage needs from its surroundings while it runs.
#[derive(Clone)]
pub struct StageEnv {
    pub catalog: Arc<StageCatalog>,
    pub plugins: Arc<PluginRegistry>,
    pub behaviors: Arc<StageBehaviorRegistry>,
    pub runtime: RuntimeContext,
    pub core: CoreSettings,
    pub store: Arc<dyn CheckpointStore>,
    pub shutdown: ShutdownSignal,
}

impl StageEnv {
    pub fn new(catalog: Arc<StageCatalog>) -> Self {
        Self {
            catalog,
            plugins: Arc::new(PluginRegistry::new()),
            behaviors: Arc::new(StageBehaviorRegistry::new()),
            runtime: RuntimeContext::default(),
            core: CoreSettings::default(),
            store: Arc::new(MemoryCheckpointStore::new()),
            shutdown: ShutdownSignal::new(),
        }
    }
}

/// Input of one stage invocation on one worker.
#[derive(Debug, Clone, Default)]
pub struct StageInput {
    pub context: BTreeMap<String, ContextValue>,
    pub worker_index: usize,
    pub worker_count: usize,
}

/// A stage in the middle of running, as seen by its behavior.
pub struct StageRun<'a> {
    pub config: &'a StageConfig,
    pub hooks: &'a [Hook],
    pub context: &'a StageContext,
    pub dispatcher: &'a EventDispatcher,
    pub env: &'a StageEnv,
    pub worker_index: usize,
    pub worker_count: usize,
}

impl StageRun<'_> {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Type-specific work of a stage, run between its setup and teardown hooks.
#[async_trait]
pub trait StageBehavior: Send + Sync {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError>;
}

/// Behaviors by stage type.
pub struct StageBehaviorRegistry {
    behaviors: HashMap<StageType, Arc<dyn StageBehavior>>,
}

impl StageBehaviorRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            behaviors: HashMap::new(),
        };
        registry.register(StageType::Idle, Arc::new(super::lifecycle::IdleBehavior));
        registry.register(StageType::Validate, Arc::new(super::lifecycle::ValidateBehavior));
        registry.register(StageType::Setup, Arc::new(super::setup::SetupBehavior));
        registry.register(StageType::Optimize, Arc::new(super::optimize::OptimizeBehavior));
        registry.register(StageType::Execute, Arc::new(super::execute::ExecuteBehavior));
        registry.register(StageType::Analyze, Arc::new(super::analyze::AnalyzeBehavior));
        registry.register(StageType::Checkpoint, Arc::new(super::lifecycle::CheckpointBehavior));
        registry.register(StageType::Submit, Arc::new(super::submit::SubmitBehavior));
        registry.register(StageType::Wait, Arc::new(super::lifecycle::WaitBehavior));
        registry.register(StageType::Teardown, Arc::new(super::lifecycle::TeardownBehavior));
        registry.register(StageType::Complete, Arc::new(super::lifecycle::CompleteBehavior));
        registry.register(StageType::Error, Arc::new(super::lifecycle::ErrorBehavior));
        registry
    }

    pub fn register(&mut self, stage_type: StageType, behavior: Arc<dyn StageBehavior>) {
        self.behaviors.insert(stage_type, behavior);
    }

    pub fn get(&self, stage_type: StageType) -> Option<Arc<dyn StageBehavior>> {
        self.behaviors.get(&stage_type).cloned()
    }
}

impl Default for StageBehaviorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs stage `name` and returns the serializable part of its context.
///
/// The stage timeout covers the whole run. Once shutdown is requested the
/// stage gets the grace period to wind down before it is abandoned as
/// cancelled.
pub async fn run_stage(
    name: &str,
    input: StageInput,
    env: &StageEnv,
) -> Result<BTreeMap<String, ContextValue>, StageError> {
    let config = env
        .catalog
        .config(name)
        .ok_or_else(|| StageError::Execution {
            stage: name.to_string(),
            message: "stage is not part of the graph".to_string(),
            causes: Vec::new(),
        })?;
    let behavior = env
        .behaviors
        .get(config.stage_type)
        .ok_or_else(|| StageError::Execution {
            stage: name.to_string(),
            message: format!("no behavior registered for {} stages", config.stage_type),
            causes: Vec::new(),
        })?;

    let shutdown = env.shutdown.child();
    let context = StageContext::from_values(input.context).with_shutdown(shutdown.clone());
    for key in config.requires_keys() {
        context.declare(key);
    }

    let hooks = env.catalog.hooks(name);
    let dispatcher = EventDispatcher::new(name, hooks)
        .with_store(Arc::clone(&env.store))
        .with_timeout(config.hook_timeout);
    let run = StageRun {
        config,
        hooks,
        context: &context,
        dispatcher: &dispatcher,
        env,
        worker_index: input.worker_index,
        worker_count: input.worker_count.max(1),
    };

    let work = async {
        dispatcher.run_lifecycle(HookType::Setup, &context).await?;
        let outcome = dispatcher.dispatch(&context).await?;
        if !outcome.skipped.is_empty() {
            tracing::debug!(stage = %name, skipped = ?outcome.skipped, "Condition skipped hooks");
        }
        behavior.run(&run).await?;
        dispatcher.run_lifecycle(HookType::Teardown, &context).await?;
        Ok::<(), StageError>(())
    };
    let timed = async {
        match config.timeout {
            Some(timeout) => tokio::time::timeout(timeout, work)
                .await
                .map_err(|_| StageError::Timeout {
                    stage: name.to_string(),
                    timeout,
                })?,
            None => work.await,
        }
    };

    tokio::select! {
        result = timed => result?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(shutdown.grace_period() + CANCEL_MARGIN).await;
        } => {
            return Err(StageError::Cancelled { stage: name.to_string() });
        }
    }

    if shutdown.is_triggered() {
        return Err(StageError::Cancelled {
            stage: name.to_string(),
        });
    }
    Ok(context.serializable())
}

/// Folds the outputs of the worker copies of one stage into one.
///
/// Execute results are merged per stage; for every other key the first
/// worker's value wins.
pub fn merge_worker_outputs(
    stage: &str,
    outputs: Vec<BTreeMap<String, ContextValue>>,
) -> Result<BTreeMap<String, ContextValue>, StageError> {
    let mut outputs = outputs.into_iter();
    let Some(mut merged) = outputs.next() else {
        return Ok(BTreeMap::new());
    };
    for output in outputs {
        for (key, value) in output {
            if key != EXECUTE_RESULTS {
                merged.entry(key).or_insert(value);
                continue;
            }
            let combined = merge_execute_results(stage, merged.get(&key), &value)?;
            merged.insert(key, combined);
        }
    }
    Ok(merged)
}

fn merge_execute_results(
    stage: &str,
    current: Option<&ContextValue>,
    incoming: &ContextValue,
) -> Result<ContextValue, StageError> {
    let (Some(ContextValue::Map(current)), ContextValue::Map(incoming)) = (current, incoming) else {
        return Ok(incoming.clone());
    };
    let mut combined = current.clone();
    for (name, value) in incoming {
        let merged = match combined.get(name) {
            Some(existing) => {
                let mut output: PersonaOutput = existing
                    .deserialize_into()
                    .map_err(|e| StageError::execution(stage, &e))?;
                let other: PersonaOutput = value
                    .deserialize_into()
                    .map_err(|e| StageError::execution(stage, &e))?;
                output.merge(other);
                ContextValue::from_serializable(&output).map_err(|e| StageError::execution(stage, &e))?
            }
            None => value.clone(),
        };
        combined.insert(name.clone(), merged);
    }
    Ok(ContextValue::Map(combined))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookRegistry;
    use crate::stages::StageBuilder;

    fn env_with(stages: Vec<crate::stages::Stage>) -> StageEnv {
        let mut hooks = HookRegistry::new();
        let mut configs = Vec::new();
        for stage in stages {
            let name = stage.name().to_string();
            hooks.register_stage(&name, stage.hooks).unwrap();
            configs.push(stage.config);
        }
        StageEnv::new(Arc::new(StageCatalog::new(configs, hooks)))
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_wrap_behavior() {
        let stage = StageBuilder::new("pause", StageType::Wait)
            .wait(Duration::from_millis(1))
            .hook(Hook::setup("open", |_| async { Ok(ContextValue::from("opened")) }).store("opened"))
            .hook(Hook::teardown("close", |args| async move {
                let opened = args.context.get_string("opened").unwrap_or_default();
                Ok(ContextValue::from(format!("{opened}+closed")))
            })
            .store("closed"))
            .build();
        let env = env_with(vec![stage]);

        let output = run_stage("pause", StageInput::default(), &env).await.unwrap();
        assert_eq!(output["closed"], ContextValue::from("opened+closed"));
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let stage = StageBuilder::new("pause", StageType::Wait)
            .wait(Duration::from_secs(5))
            .timeout(Duration::from_millis(20))
            .build();
        let env = env_with(vec![stage]);

        let err = run_stage("pause", StageInput::default(), &env).await.unwrap_err();
        assert!(matches!(err, StageError::Timeout { ref stage, .. } if stage == "pause"));
        assert_eq!(err.kind(), crate::error::ErrorKind::StageTimeout);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_stage() {
        let stage = StageBuilder::new("pause", StageType::Wait)
            .wait(Duration::from_secs(5))
            .build();
        let env = env_with(vec![stage]);
        env.shutdown.trigger();

        let err = run_stage("pause", StageInput::default(), &env).await.unwrap_err();
        assert!(matches!(err, StageError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_unknown_stage() {
        let env = env_with(Vec::new());
        let err = run_stage("ghost", StageInput::default(), &env).await.unwrap_err();
        assert_eq!(err.stage(), "ghost");
    }

    #[test]
    fn test_merge_worker_outputs_combines_results() {
        let output = |total: usize| {
            let persona = PersonaOutput {
                results: Vec::new(),
                total_results: total,
                total_elapsed: Duration::from_secs(1),
            };
            let mut results = BTreeMap::new();
            results.insert("load".to_string(), ContextValue::from_serializable(&persona).unwrap());
            let mut map = BTreeMap::new();
            map.insert(EXECUTE_RESULTS.to_string(), ContextValue::Map(results));
            map.insert("worker".to_string(), ContextValue::from(total));
            map
        };

        let merged = merge_worker_outputs("load", vec![output(3), output(4)]).unwrap();
        let persona: PersonaOutput = merged[EXECUTE_RESULTS].as_map().unwrap()["load"]
            .deserialize_into()
            .unwrap();
        assert_eq!(persona.total_results, 7);
        assert_eq!(merged["worker"], ContextValue::from(3usize));
    }
}

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::run::{StageBehavior, StageEnv, StageRun};
use super::setup::prepare_actions;
use crate::core::{ContextValue, ShutdownSignal, StageContext};
use crate::dispatcher::{ActionPlan, EventDispatcher};
use crate::engines::{ActionRunner, EngineSet, PreparedAction};
use crate::error::StageError;
use crate::hooks::{Hook, HookType};
use crate::optimizer::OptimizedParams;
use crate::personas::{Persona, PersonaConfig, PersonaOutput};
use crate::transitions::{EXECUTE_RESULTS, OPTIMIZED_PARAMS, SETUP_ACTIONS, SHARED_ACTIONS};

/// Drives the stage's persona over its actions and records the results
/// under `execute_results`.
pub struct ExecuteBehavior;

#[async_trait]
impl StageBehavior for ExecuteBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        let stage = run.name();
        let mut config = run.config.persona.clone();
        if let Some(params) = optimized_params(stage, run.context)? {
            tracing::debug!(stage = %stage, batch_size = params.batch_size, "Applying optimized parameters");
            params.apply(&mut config);
        }
        config.batch_size = split_batch(config.batch_size, run.worker_index, run.worker_count);
        if config.batch_size == 0 {
            tracing::debug!(stage = %stage, worker = run.worker_index, "No share of the batch, idling");
            return record_output(stage, run.context, &PersonaOutput::default());
        }

        let workload = build_workload(stage, run.context, run.env, config.batch_size).await?;
        tracing::info!(
            stage = %stage,
            worker = run.worker_index,
            batch_size = config.batch_size,
            plans = workload.plans.len(),
            "Executing"
        );
        let output = workload.run(stage, config, run.context.shutdown()).await?;
        tracing::info!(
            stage = %stage,
            worker = run.worker_index,
            results = output.total_results,
            elapsed_ms = output.total_elapsed.as_millis() as u64,
            "Execution finished"
        );

        record_output(stage, run.context, &output)
    }
}

fn record_output(stage: &str, context: &StageContext, output: &PersonaOutput) -> Result<(), StageError> {
    let record = ContextValue::from_serializable(output).map_err(|e| StageError::execution(stage, &e))?;
    let mut results = BTreeMap::new();
    results.insert(stage.to_string(), record);
    context.set(EXECUTE_RESULTS, ContextValue::Map(results));
    Ok(())
}

/// This worker's share of `batch_size` when a stage runs on `count` workers.
/// Shares sum to `batch_size`, so a worker past it gets 0.
pub fn split_batch(batch_size: usize, index: usize, count: usize) -> usize {
    if count < 2 {
        return batch_size;
    }
    let base = batch_size / count;
    let extra = usize::from(index < batch_size % count);
    base + extra
}

fn optimized_params(stage: &str, context: &StageContext) -> Result<Option<OptimizedParams>, StageError> {
    let Some(ContextValue::Map(entries)) = context.get(OPTIMIZED_PARAMS) else {
        return Ok(None);
    };
    entries
        .get(stage)
        .map(|value| value.deserialize_into().map_err(|e| StageError::execution(stage, &e)))
        .transpose()
}

/// Runner and plans for one stage's actions, ready for a persona.
pub(crate) struct Workload {
    pub runner: ActionRunner,
    pub plans: Vec<ActionPlan>,
    pub engines: EngineSet,
}

impl Workload {
    pub(crate) async fn run(
        self,
        stage: &str,
        config: PersonaConfig,
        shutdown: &ShutdownSignal,
    ) -> Result<PersonaOutput, StageError> {
        let mut persona = Persona::new(config).with_shutdown(shutdown);
        let engines = self.engines;
        let output = match persona.setup(self.runner, self.plans) {
            Ok(()) => Ok(persona.execute().await),
            Err(err) => Err(StageError::execution(stage, &err)),
        };
        engines.close().await;
        output
    }
}

/// Collects what `target` runs: the actions a Setup prepared for it, its
/// share of the shared actions, and any own action no Setup prepared.
pub(crate) async fn build_workload(
    target: &str,
    context: &StageContext,
    env: &StageEnv,
    pool_size: usize,
) -> Result<Workload, StageError> {
    let hooks = env.catalog.hooks(target);
    let dispatcher = EventDispatcher::new(target, hooks);
    let engines = EngineSet::new(pool_size.max(1), env.runtime.clone());
    let mut runner = ActionRunner::new(target, engines.clone(), context.clone())
        .with_channels(dispatcher.channels().clone());
    runner.bind_hooks(hooks.iter());

    let mut assigned = assigned_actions(target, context)?;
    let unprepared: Vec<Hook> = hooks
        .iter()
        .filter(|h| h.hook_type == HookType::Action && !assigned.iter().any(|p| p.name() == h.name))
        .cloned()
        .collect();
    if !unprepared.is_empty() {
        assigned.extend(prepare_actions(&engines, target, target, &unprepared).await?);
    }

    let mut plans = dispatcher.action_plans().to_vec();
    for prepared in assigned {
        if prepared.owner != target {
            let foreign = env.catalog.hooks(&prepared.owner).iter().filter(|h| {
                matches!(h.hook_type, HookType::Before | HookType::After | HookType::Check)
                    && h.names.iter().any(|n| n == prepared.name())
            });
            runner.bind_hooks(foreign);
        }
        if !plans.iter().any(|p| p.steps.iter().any(|s| s == prepared.name())) {
            plans.push(ActionPlan {
                name: prepared.name().to_string(),
                steps: vec![prepared.name().to_string()],
                order: 0,
                weight: prepared.action.metadata.weight.unwrap_or(1.0),
            });
        }
        runner.add_prepared(prepared);
    }

    Ok(Workload {
        runner,
        plans,
        engines,
    })
}

fn assigned_actions(target: &str, context: &StageContext) -> Result<Vec<PreparedAction>, StageError> {
    let Some(ContextValue::Map(entries)) = context.get(SETUP_ACTIONS) else {
        return Ok(Vec::new());
    };
    let mut actions: Vec<PreparedAction> = Vec::new();
    for key in [target, SHARED_ACTIONS] {
        let Some(value) = entries.get(key) else {
            continue;
        };
        let list: Vec<PreparedAction> = value
            .deserialize_into()
            .map_err(|e| StageError::execution(target, &e))?;
        for prepared in list {
            if !actions.iter().any(|a| a.name() == prepared.name()) {
                actions.push(prepared);
            }
        }
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::hooks::HookRegistry;
    use crate::stages::{run_stage, Stage, StageBuilder, StageCatalog, StageInput, StageType};

    fn env_with(stages: Vec<Stage>) -> StageEnv {
        let mut hooks = HookRegistry::new();
        let mut configs = Vec::new();
        for stage in stages {
            let name = stage.name().to_string();
            hooks.register_stage(&name, stage.hooks).unwrap();
            configs.push(stage.config);
        }
        StageEnv::new(Arc::new(StageCatalog::new(configs, hooks)))
    }

    fn persona() -> PersonaConfig {
        PersonaConfig::new(4, Duration::from_millis(200))
            .with_batch_interval(Duration::from_millis(20))
            .with_graceful_stop(Duration::from_millis(50))
    }

    fn counting_stage(calls: Arc<AtomicUsize>) -> Stage {
        StageBuilder::new("load", StageType::Execute)
            .persona(persona())
            .hook(Hook::task("compute", move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ContextValue::from(1i64))
                }
            }))
            .build()
    }

    fn decode(output: &BTreeMap<String, ContextValue>) -> PersonaOutput {
        output[EXECUTE_RESULTS].as_map().unwrap()["load"]
            .deserialize_into()
            .unwrap()
    }

    #[test]
    fn test_split_batch() {
        assert_eq!(split_batch(10, 0, 1), 10);
        assert_eq!(split_batch(10, 0, 3), 4);
        assert_eq!(split_batch(10, 1, 3), 3);
        assert_eq!(split_batch(10, 2, 3), 3);
        assert_eq!(split_batch(2, 1, 4), 1);
        assert_eq!(split_batch(2, 3, 4), 0);
        let shares: Vec<usize> = (0..4).map(|i| split_batch(1, i, 4)).collect();
        assert_eq!(shares, vec![1, 0, 0, 0]);
        let total: usize = (0..4).map(|i| split_batch(1000, i, 4)).sum();
        assert_eq!(total, 1000);
    }

    #[tokio::test]
    async fn test_execute_runs_tasks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let env = env_with(vec![counting_stage(Arc::clone(&calls))]);

        let output = run_stage("load", StageInput::default(), &env).await.unwrap();
        let persona = decode(&output);
        assert!(persona.total_results > 0);
        assert_eq!(persona.total_results, calls.load(Ordering::SeqCst));
        assert!(persona.results.iter().all(|r| r.stage == "load" && r.name == "compute"));
    }

    #[tokio::test]
    async fn test_worker_without_share_runs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut stage = counting_stage(Arc::clone(&calls));
        stage.config.persona.batch_size = 1;
        let env = env_with(vec![stage]);
        let input = StageInput {
            worker_index: 3,
            worker_count: 4,
            ..Default::default()
        };

        let output = run_stage("load", input, &env).await.unwrap();
        assert_eq!(decode(&output).total_results, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_optimized_params_applied() {
        let env = env_with(vec![counting_stage(Arc::new(AtomicUsize::new(0)))]);
        let params = OptimizedParams {
            batch_size: 1,
            batch_interval: None,
        };
        let mut entries = BTreeMap::new();
        entries.insert("load".to_string(), ContextValue::from_serializable(&params).unwrap());
        let mut context = BTreeMap::new();
        context.insert(OPTIMIZED_PARAMS.to_string(), ContextValue::Map(entries));

        let stage_context = StageContext::from_values(context.clone());
        assert_eq!(optimized_params("load", &stage_context).unwrap(), Some(params));
        assert_eq!(optimized_params("other", &stage_context).unwrap(), None);

        let input = StageInput {
            context,
            ..Default::default()
        };
        run_stage("load", input, &env).await.unwrap();
    }

    #[tokio::test]
    async fn test_shared_actions_get_single_step_plans() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);
        let env = env_with(vec![
            StageBuilder::new("prepare", StageType::Setup)
                .hook(Hook::action("home", crate::engines::Action::http("home", "GET", url)))
                .hook(Hook::check("is_ok", &["home"], |_| Ok(())))
                .build(),
            StageBuilder::new("load", StageType::Execute)
                .depends_on(&["prepare"])
                .build(),
        ]);

        let engines = EngineSet::new(1, env.runtime.clone());
        let shared = prepare_actions(&engines, "prepare", "prepare", env.catalog.hooks("prepare"))
            .await
            .unwrap();
        let mut entries = BTreeMap::new();
        entries.insert(SHARED_ACTIONS.to_string(), ContextValue::from_serializable(&shared).unwrap());
        let mut values = BTreeMap::new();
        values.insert(SETUP_ACTIONS.to_string(), ContextValue::Map(entries));

        let workload = build_workload("load", &StageContext::from_values(values), &env, 1)
            .await
            .unwrap();
        assert_eq!(workload.plans.len(), 1);
        assert_eq!(workload.plans[0].steps, vec!["home".to_string()]);
        assert_eq!(workload.runner.runnable(), vec!["home".to_string()]);
        workload.engines.close().await;
    }
}

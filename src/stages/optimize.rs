use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::execute::build_workload;
use super::run::{StageBehavior, StageEnv, StageRun};
use crate::core::{ContextValue, StageContext};
use crate::error::StageError;
use crate::optimizer::{BatchSizeOptimizer, Optimizer, OptimizerConfig, TrialOutcome, TrialRunner};
use crate::personas::PersonaConfig;
use crate::plugins::PluginRegistry;
use crate::transitions::OPTIMIZED_PARAMS;

/// Tunes the persona parameters of every Execute stage downstream and hands
/// them on as `optimized_params`.
pub struct OptimizeBehavior;

#[async_trait]
impl StageBehavior for OptimizeBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        let stage = run.name();
        let optimizer = resolve_optimizer(stage, run.config.optimizer.as_ref(), &run.env.plugins)?;

        let mut params = BTreeMap::new();
        for target in run.env.catalog.optimize_targets(stage) {
            let Some(config) = run.env.catalog.config(&target) else {
                continue;
            };
            let trials = PersonaTrials {
                target: &target,
                context: run.context,
                env: run.env,
            };
            let found = optimizer.optimize(&config.persona, &trials).await?;
            tracing::info!(
                stage = %stage,
                target = %target,
                optimizer = optimizer.name(),
                batch_size = found.batch_size,
                "Optimized"
            );
            let record = ContextValue::from_serializable(&found).map_err(|e| StageError::execution(stage, &e))?;
            params.insert(target, record);
        }
        run.context.set(OPTIMIZED_PARAMS, ContextValue::Map(params));
        Ok(())
    }
}

fn resolve_optimizer(
    stage: &str,
    config: Option<&OptimizerConfig>,
    plugins: &PluginRegistry,
) -> Result<Arc<dyn Optimizer>, StageError> {
    match config.cloned().unwrap_or_default() {
        OptimizerConfig::BatchSize {
            min_batch_size,
            max_batch_size,
            steps,
            trial_time,
        } => Ok(Arc::new(BatchSizeOptimizer::new(
            min_batch_size,
            max_batch_size,
            steps,
            trial_time,
        ))),
        OptimizerConfig::Plugin { name } => plugins.optimizer(&name).ok_or_else(|| StageError::Execution {
            stage: stage.to_string(),
            message: format!("no optimizer plugin named '{name}'"),
            causes: Vec::new(),
        }),
    }
}

/// Trial runs of one target's actual workload.
struct PersonaTrials<'a> {
    target: &'a str,
    context: &'a StageContext,
    env: &'a StageEnv,
}

#[async_trait]
impl TrialRunner for PersonaTrials<'_> {
    async fn run_trial(&self, config: PersonaConfig) -> Result<TrialOutcome, StageError> {
        let batch_size = config.batch_size;
        let workload = build_workload(self.target, self.context, self.env, batch_size).await?;
        let output = workload
            .run(self.target, config, self.context.shutdown())
            .await?;
        Ok(TrialOutcome {
            batch_size,
            completed: output.total_results,
            succeeded: output.results.iter().filter(|r| r.success()).count(),
            elapsed: output.total_elapsed,
        })
    }
}

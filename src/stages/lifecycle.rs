//! Behaviors of the stage types that do not drive load.

use async_trait::async_trait;

use super::run::{StageBehavior, StageRun};
use crate::core::ContextValue;
use crate::error::{GraphError, StageError};
use crate::hooks::{validate_stage_hooks, HookReport, HookType};
use crate::transitions::VALIDATION;

/// Context key an Error stage reads the failure report from.
pub const ERROR_REPORT: &str = "error_report";

pub struct IdleBehavior;

#[async_trait]
impl StageBehavior for IdleBehavior {
    async fn run(&self, _run: &StageRun<'_>) -> Result<(), StageError> {
        Ok(())
    }
}

/// Re-checks every stage's hooks, then runs the stage's `@validate` hooks.
/// A validate hook that returns a falsy value fails validation.
pub struct ValidateBehavior;

#[async_trait]
impl StageBehavior for ValidateBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        let catalog = &run.env.catalog;
        let mut report = HookReport::default();
        for config in catalog.configs() {
            report.merge(validate_stage_hooks(
                &config.name,
                config.stage_type,
                catalog.hooks(&config.name),
            ));
        }
        let outputs = run
            .dispatcher
            .run_lifecycle(HookType::Validate, run.context)
            .await?;

        let record =
            ContextValue::from_serializable(&report).map_err(|e| StageError::execution(run.name(), &e))?;
        run.context.set(VALIDATION, record);
        report.into_result().map_err(|e| StageError::execution(run.name(), &e))?;

        if let Some((hook, _)) = outputs.iter().find(|(_, value)| !value.is_truthy()) {
            let err = GraphError::HookValidation {
                stage: run.name().to_string(),
                hook: hook.clone(),
                reason: "validation hook returned a falsy value".to_string(),
            };
            return Err(StageError::execution(run.name(), &err));
        }
        tracing::info!(stage = %run.name(), stages = catalog.len(), "Graph validated");
        Ok(())
    }
}

/// Save and load hooks already ran in the dispatch pass.
pub struct CheckpointBehavior;

#[async_trait]
impl StageBehavior for CheckpointBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        tracing::debug!(stage = %run.name(), keys = run.context.len(), "Checkpoint taken");
        Ok(())
    }
}

pub struct WaitBehavior;

#[async_trait]
impl StageBehavior for WaitBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        let Some(duration) = run.config.wait else {
            return Ok(());
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = run.context.shutdown().cancelled() => {
                tracing::debug!(stage = %run.name(), "Wait interrupted by shutdown");
            }
        }
        Ok(())
    }
}

/// `@teardown` hooks run after every stage; a Teardown stage only marks the point.
pub struct TeardownBehavior;

#[async_trait]
impl StageBehavior for TeardownBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        tracing::debug!(stage = %run.name(), "Tearing down");
        Ok(())
    }
}

pub struct CompleteBehavior;

#[async_trait]
impl StageBehavior for CompleteBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        tracing::debug!(stage = %run.name(), "Graph reached its sink");
        Ok(())
    }
}

/// Logs the failure it was handed. Its teardown hooks release resources.
pub struct ErrorBehavior;

#[async_trait]
impl StageBehavior for ErrorBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        match run.context.get(ERROR_REPORT) {
            Some(report) => {
                tracing::error!(stage = %run.name(), report = %report.to_json(), "Graph failed")
            }
            None => tracing::error!(stage = %run.name(), "Graph failed without a report"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;
    use crate::hooks::{Hook, HookRegistry};
    use crate::stages::{run_stage, Stage, StageBuilder, StageCatalog, StageEnv, StageInput, StageType};

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

    #[tokio::test]
    async fn test_validate_records_report() {
        let validate = StageBuilder::new("validate", StageType::Validate)
            .hook(Hook::validate("targets_reachable", |_| async { Ok(ContextValue::Bool(true)) }))
            .build();
        let env = env_with(vec![validate]);

        let output = run_stage("validate", StageInput::default(), &env).await.unwrap();
        let report: HookReport = output[VALIDATION].deserialize_into().unwrap();
        assert!(report.is_valid());
    }

    #[tokio::test]
    async fn test_validate_fails_on_falsy_hook() {
        let validate = StageBuilder::new("validate", StageType::Validate)
            .hook(Hook::validate("always_no", |_| async { Ok(ContextValue::Bool(false)) }))
            .build();
        let env = env_with(vec![validate]);

        let err = run_stage("validate", StageInput::default(), &env).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StageExecution);
        assert!(err.to_string().contains("always_no"));
    }

    #[tokio::test]
    async fn test_validate_rechecks_other_stages() {
        let validate = StageBuilder::new("validate", StageType::Validate).build();
        // an action hook is not allowed in an Analyze stage
        let analyze = StageBuilder::new("metrics", StageType::Analyze)
            .hook(Hook::task("stray", |_| async { Ok(ContextValue::None) }))
            .build();
        let env = env_with(vec![validate, analyze]);

        let err = run_stage("validate", StageInput::default(), &env).await.unwrap_err();
        assert!(err.to_string().contains("stray"));
    }

    #[tokio::test]
    async fn test_error_stage_reads_report() {
        let env = env_with(vec![StageBuilder::new("error", StageType::Error).build()]);
        let mut context = BTreeMap::new();
        context.insert(ERROR_REPORT.to_string(), ContextValue::from("boom"));
        let input = StageInput {
            context,
            ..Default::default()
        };
        run_stage("error", input, &env).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps() {
        let env = env_with(vec![StageBuilder::new("pause", StageType::Wait)
            .wait(Duration::from_secs(3))
            .build()]);
        let started = tokio::time::Instant::now();
        run_stage("pause", StageInput::default(), &env).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}

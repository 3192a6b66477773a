use async_trait::async_trait;

use super::run::{StageBehavior, StageRun};
use crate::core::ContextValue;
use crate::engines::ActionResult;
use crate::error::StageError;
use crate::hooks::{Hook, HookCall, HookType};
use crate::personas::PersonaOutput;
use crate::reporting::{MetricsSet, StageMetrics};
use crate::transitions::{ANALYZE_METRICS, EXECUTE_RESULTS};

/// Aggregates the results of upstream Execute stages into `analyze_metrics`,
/// adding the values of the stage's own `@metric` hooks.
pub struct AnalyzeBehavior;

#[async_trait]
impl StageBehavior for AnalyzeBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        let stage = run.name();
        let mut set = MetricsSet::default();
        match run.context.get(EXECUTE_RESULTS) {
            Some(ContextValue::Map(entries)) => {
                for (name, value) in entries {
                    let output: PersonaOutput =
                        value.deserialize_into().map_err(|e| StageError::execution(stage, &e))?;
                    let mut metrics = StageMetrics::aggregate(&name, &output.results, output.total_elapsed);
                    for hook in run.hooks.iter().filter(|h| h.hook_type == HookType::Metric) {
                        if let Some(value) = custom_metric(hook, &output.results) {
                            metrics.custom.insert(hook.name.clone(), value);
                        }
                    }
                    tracing::info!(
                        stage = %stage,
                        execute = %name,
                        total = metrics.total,
                        succeeded = metrics.succeeded,
                        rps = metrics.rps,
                        "Analyzed results"
                    );
                    set.insert(metrics);
                }
            }
            _ => tracing::warn!(stage = %stage, "No execute results to analyze"),
        }

        let record = ContextValue::from_serializable(&set).map_err(|e| StageError::execution(stage, &e))?;
        run.context.set(ANALYZE_METRICS, record);
        Ok(())
    }
}

fn custom_metric(hook: &Hook, results: &[ActionResult]) -> Option<f64> {
    let HookCall::Metric(metric) = &hook.call else {
        return None;
    };
    if hook.names.is_empty() {
        return Some(metric(results));
    }
    let selected: Vec<ActionResult> = results
        .iter()
        .filter(|r| hook.names.contains(&r.name))
        .cloned()
        .collect();
    Some(metric(&selected))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::engines::EngineType;
    use crate::hooks::HookRegistry;
    use crate::stages::{run_stage, StageBuilder, StageCatalog, StageEnv, StageInput, StageType};

    fn result(name: &str, status: u16) -> ActionResult {
        let mut result = ActionResult::new(name, EngineType::Http);
        result.status = Some(status);
        if status >= 500 {
            result.error = Some("server error".to_string());
        }
        result
    }

    fn input() -> StageInput {
        let output = PersonaOutput {
            results: vec![result("home", 200), result("home", 500), result("login", 200)],
            total_results: 3,
            total_elapsed: Duration::from_secs(1),
        };
        let mut entries = BTreeMap::new();
        entries.insert("load".to_string(), ContextValue::from_serializable(&output).unwrap());
        let mut context = BTreeMap::new();
        context.insert(EXECUTE_RESULTS.to_string(), ContextValue::Map(entries));
        StageInput {
            context,
            ..Default::default()
        }
    }

    fn env() -> StageEnv {
        let stage = StageBuilder::new("metrics", StageType::Analyze)
            .hook(Hook::metric("home_count", &["home"], |results| results.len() as f64))
            .hook(Hook::metric("everything", &[], |results| results.len() as f64))
            .build();
        let mut hooks = HookRegistry::new();
        let name = stage.name().to_string();
        hooks.register_stage(&name, stage.hooks).unwrap();
        StageEnv::new(Arc::new(StageCatalog::new(vec![stage.config], hooks)))
    }

    #[tokio::test]
    async fn test_aggregates_with_custom_metrics() {
        let output = run_stage("metrics", input(), &env()).await.unwrap();
        let set: MetricsSet = output[ANALYZE_METRICS].deserialize_into().unwrap();

        let load = set.stage("load").unwrap();
        assert_eq!(load.total, 3);
        assert_eq!(load.succeeded, 2);
        assert_eq!(load.actions["home"].total, 2);
        assert_eq!(load.custom["home_count"], 2.0);
        assert_eq!(load.custom["everything"], 3.0);
    }

    #[tokio::test]
    async fn test_no_results_gives_empty_set() {
        let output = run_stage("metrics", StageInput::default(), &env()).await.unwrap();
        let set: MetricsSet = output[ANALYZE_METRICS].deserialize_into().unwrap();
        assert!(set.is_empty());
    }
}

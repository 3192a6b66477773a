use std::sync::Arc;

use async_trait::async_trait;

use super::run::{StageBehavior, StageRun};
use crate::core::ContextValue;
use crate::error::StageError;
use crate::personas::PersonaOutput;
use crate::reporting::{create_reporter, MetricsSet, Reporter};
use crate::transitions::{ANALYZE_METRICS, EXECUTE_RESULTS};

/// Sends `analyze_metrics`, and the raw results when they reached the stage,
/// to every configured reporter. With no reporters configured every plugin
/// reporter receives them.
pub struct SubmitBehavior;

#[async_trait]
impl StageBehavior for SubmitBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        let stage = run.name();
        let metrics: MetricsSet = match run.context.get(ANALYZE_METRICS) {
            Some(value) => value.deserialize_into().map_err(|e| StageError::execution(stage, &e))?,
            None => MetricsSet::default(),
        };
        let mut results: Vec<(String, PersonaOutput)> = Vec::new();
        if let Some(ContextValue::Map(entries)) = run.context.get(EXECUTE_RESULTS) {
            for (name, value) in entries {
                let output = value.deserialize_into().map_err(|e| StageError::execution(stage, &e))?;
                results.push((name, output));
            }
        }

        let reporters: Vec<Arc<dyn Reporter>> = if run.config.reporters.is_empty() {
            run.env.plugins.reporters()
        } else {
            run.config
                .reporters
                .iter()
                .map(|config| create_reporter(config, &run.env.plugins))
                .collect::<Result<_, _>>()
                .map_err(|e| StageError::execution(stage, &e))?
        };
        if reporters.is_empty() {
            tracing::warn!(stage = %stage, "No reporters to submit to");
        }

        for reporter in &reporters {
            submit(reporter.as_ref(), &metrics, &results)
                .await
                .map_err(|e| StageError::execution(stage, &e))?;
            tracing::info!(
                stage = %stage,
                reporter = reporter.name(),
                stages = metrics.stages.len(),
                "Submitted results"
            );
        }
        Ok(())
    }
}

async fn submit(
    reporter: &dyn Reporter,
    metrics: &MetricsSet,
    results: &[(String, PersonaOutput)],
) -> Result<(), crate::error::ReporterError> {
    reporter.connect().await?;
    let submitted = async {
        reporter.submit_metrics(metrics).await?;
        for (name, output) in results {
            reporter.submit_results(name, &output.results).await?;
        }
        Ok(())
    }
    .await;
    let closed = reporter.close().await;
    submitted.and(closed)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::engines::{ActionResult, EngineType};
    use crate::hooks::HookRegistry;
    use crate::plugins::PluginRegistry;
    use crate::reporting::{MemoryReporter, ReporterConfig, StageMetrics};
    use crate::stages::{run_stage, StageBuilder, StageCatalog, StageEnv, StageInput, StageType};

    fn env(reporters: Vec<ReporterConfig>, plugins: PluginRegistry) -> StageEnv {
        let mut builder = StageBuilder::new("report", StageType::Submit);
        for reporter in reporters {
            builder = builder.reporter(reporter);
        }
        let stage = builder.build();
        let mut env = StageEnv::new(Arc::new(StageCatalog::new(vec![stage.config], HookRegistry::new())));
        env.plugins = Arc::new(plugins);
        env
    }

    fn input() -> StageInput {
        let results = vec![ActionResult::new("home", EngineType::Http)];
        let mut set = MetricsSet::default();
        set.insert(StageMetrics::aggregate("load", &results, Duration::from_secs(1)));
        let output = PersonaOutput {
            total_results: results.len(),
            results,
            total_elapsed: Duration::from_secs(1),
        };
        let mut entries = BTreeMap::new();
        entries.insert("load".to_string(), ContextValue::from_serializable(&output).unwrap());

        let mut context = BTreeMap::new();
        context.insert(ANALYZE_METRICS.to_string(), ContextValue::from_serializable(&set).unwrap());
        context.insert(EXECUTE_RESULTS.to_string(), ContextValue::Map(entries));
        StageInput {
            context,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_submits_to_named_plugin() {
        let memory = MemoryReporter::new();
        let mut plugins = PluginRegistry::new();
        plugins.register_reporter("capture", Arc::new(memory.clone()));
        let config = ReporterConfig::Plugin {
            name: "capture".to_string(),
        };

        run_stage("report", input(), &env(vec![config], plugins)).await.unwrap();
        assert_eq!(memory.latest_metrics().unwrap().total(), 1);
        assert_eq!(memory.results("load").len(), 1);
        assert!(memory.is_closed());
    }

    #[tokio::test]
    async fn test_falls_back_to_plugin_reporters() {
        let memory = MemoryReporter::new();
        let mut plugins = PluginRegistry::new();
        plugins.register_reporter("capture", Arc::new(memory.clone()));

        run_stage("report", input(), &env(Vec::new(), plugins)).await.unwrap();
        assert_eq!(memory.metrics().len(), 1);
    }

    #[tokio::test]
    async fn test_json_reporter_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.json");
        let config = ReporterConfig::Json { path: path.clone() };

        run_stage("report", input(), &env(vec![config], PluginRegistry::new()))
            .await
            .unwrap();
        let written: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["metrics"]["stages"]["load"]["total"], 1);
    }

    #[tokio::test]
    async fn test_unknown_reporter_plugin_fails() {
        let config = ReporterConfig::Plugin {
            name: "nowhere".to_string(),
        };
        let err = run_stage("report", input(), &env(vec![config], PluginRegistry::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }
}

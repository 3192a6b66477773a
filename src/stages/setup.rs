use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use super::run::{StageBehavior, StageRun};
use crate::config::CoreSettings;
use crate::core::ContextValue;
use crate::engines::{EngineSet, PreparedAction};
use crate::error::StageError;
use crate::hooks::{Hook, HookType};
use crate::transitions::{SETUP_ACTIONS, SHARED_ACTIONS};

const VALIDATION_BACKOFF: Duration = Duration::from_millis(100);

/// Prepares the actions of every Execute and Optimize stage it feeds, plus
/// its own shared actions, and hands them on as `setup_actions`.
pub struct SetupBehavior;

#[async_trait]
impl StageBehavior for SetupBehavior {
    async fn run(&self, run: &StageRun<'_>) -> Result<(), StageError> {
        let stage = run.name();
        let catalog = &run.env.catalog;
        let engines = EngineSet::new(1, run.env.runtime.clone());

        let mut prepared: BTreeMap<String, Vec<PreparedAction>> = BTreeMap::new();
        for candidate in catalog.setup_candidates(stage) {
            let actions = prepare_actions(&engines, stage, &candidate, catalog.hooks(&candidate)).await?;
            if !actions.is_empty() {
                prepared.insert(candidate, actions);
            }
        }
        let shared = prepare_actions(&engines, stage, stage, run.hooks).await?;

        let result = validate_connections(
            &engines,
            stage,
            prepared.values().flatten().chain(shared.iter()),
            &run.env.core,
        )
        .await;
        engines.close().await;
        result?;

        let encode = |actions: &Vec<PreparedAction>| {
            ContextValue::from_serializable(actions).map_err(|e| StageError::execution(stage, &e))
        };
        let mut entries = BTreeMap::new();
        for (candidate, actions) in &prepared {
            entries.insert(candidate.clone(), encode(actions)?);
        }
        entries.insert(SHARED_ACTIONS.to_string(), encode(&shared)?);

        tracing::info!(
            stage = %stage,
            stages = prepared.len(),
            actions = prepared.values().map(Vec::len).sum::<usize>() + shared.len(),
            "Prepared actions"
        );
        run.context.set(SETUP_ACTIONS, ContextValue::Map(entries));
        Ok(())
    }
}

/// Prepares every `@action` hook in `hooks` on behalf of `owner`.
pub(crate) async fn prepare_actions(
    engines: &EngineSet,
    stage: &str,
    owner: &str,
    hooks: &[Hook],
) -> Result<Vec<PreparedAction>, StageError> {
    let mut prepared = Vec::new();
    for hook in hooks.iter().filter(|h| h.hook_type == HookType::Action) {
        let Some(action) = hook.request() else {
            continue;
        };
        let engine = engines.get(action.engine);
        let action = engine
            .prepare(action, owner)
            .await
            .map_err(|e| StageError::execution(stage, &e))?;
        prepared.push(action);
    }
    Ok(prepared)
}

async fn validate_connections<'a>(
    engines: &EngineSet,
    stage: &str,
    actions: impl Iterator<Item = &'a PreparedAction>,
    core: &CoreSettings,
) -> Result<(), StageError> {
    if core.bypass_connection_validation {
        return Ok(());
    }
    let attempts = core.connection_validation_retries.max(1);
    for prepared in actions {
        let engine = engines.get(prepared.action.engine);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match engine.check_connection(prepared.name()).await {
                Ok(()) => break,
                Err(err) if attempt >= attempts => {
                    return Err(StageError::ConnectionValidation {
                        stage: stage.to_string(),
                        action: prepared.name().to_string(),
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        stage = %stage,
                        action = %prepared.name(),
                        attempt,
                        error = %err,
                        "Connection validation failed, retrying"
                    );
                    tokio::time::sleep(VALIDATION_BACKOFF * attempt).await;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engines::Action;
    use crate::error::ErrorKind;
    use crate::hooks::HookRegistry;
    use crate::stages::{run_stage, Stage, StageBuilder, StageCatalog, StageEnv, StageInput, StageType};

    fn env_with(stages: Vec<Stage>, core: CoreSettings) -> StageEnv {
        let mut hooks = HookRegistry::new();
        let mut configs = Vec::new();
        for stage in stages {
            let name = stage.name().to_string();
            hooks.register_stage(&name, stage.hooks).unwrap();
            configs.push(stage.config);
        }
        let mut env = StageEnv::new(Arc::new(StageCatalog::new(configs, hooks)));
        env.core = core;
        env
    }

    fn graph(url: &str) -> Vec<Stage> {
        vec![
            StageBuilder::new("prepare", StageType::Setup)
                .hook(Hook::action("health", Action::http("health", "GET", format!("{url}/healthz"))))
                .build(),
            StageBuilder::new("load", StageType::Execute)
                .depends_on(&["prepare"])
                .hook(Hook::action("home", Action::http("home", "GET", format!("{url}/"))))
                .build(),
        ]
    }

    fn decode(output: &BTreeMap<String, ContextValue>, key: &str) -> Vec<PreparedAction> {
        output[SETUP_ACTIONS].as_map().unwrap()[key]
            .deserialize_into()
            .unwrap()
    }

    #[tokio::test]
    async fn test_prepares_downstream_and_shared_actions() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        let env = env_with(graph(&url), CoreSettings::default());

        let output = run_stage("prepare", StageInput::default(), &env).await.unwrap();
        let load = decode(&output, "load");
        assert_eq!(load.len(), 1);
        assert_eq!(load[0].name(), "home");
        assert_eq!(load[0].owner, "load");

        let shared = decode(&output, SHARED_ACTIONS);
        assert_eq!(shared[0].name(), "health");
        assert_eq!(shared[0].owner, "prepare");

        // same declarations, same registered set
        let again = run_stage("prepare", StageInput::default(), &env).await.unwrap();
        assert_eq!(decode(&again, "load"), load);
    }

    #[tokio::test]
    async fn test_connection_validation_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let core = CoreSettings {
            connection_validation_retries: 2,
            ..CoreSettings::default()
        };
        let env = env_with(graph(&url), core);

        let err = run_stage("prepare", StageInput::default(), &env).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionValidation);
        assert!(matches!(err, StageError::ConnectionValidation { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_bypass_skips_validation() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let core = CoreSettings {
            bypass_connection_validation: true,
            ..CoreSettings::default()
        };
        let env = env_with(graph(&url), core);

        let output = run_stage("prepare", StageInput::default(), &env).await.unwrap();
        assert_eq!(decode(&output, "load").len(), 1);
    }
}

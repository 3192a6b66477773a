use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::channel::ChannelBus;
use super::event::Event;
use super::execution_path::{ActionPlan, ExecutionGraph};
use crate::core::checkpoint::{decode_value, encode_value};
use crate::core::{CheckpointStore, ContextValue, MemoryCheckpointStore, StageContext};
use crate::error::{CheckpointError, HookError, StageError};
use crate::hooks::{Hook, HookArgs, HookCall, HookType};

/// What a dispatch pass produced.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub outputs: BTreeMap<String, ContextValue>,
    /// Hooks not run because a condition upstream of them returned false.
    pub skipped: BTreeSet<String>,
    pub waves: usize,
}

impl DispatchOutcome {
    pub fn output(&self, hook: &str) -> Option<&ContextValue> {
        self.outputs.get(hook)
    }
}

type HookOutcome = (String, Result<ContextValue, HookError>);

/// Runs a stage's hooks as concurrent waves ordered by dependency and priority.
pub struct EventDispatcher {
    stage: String,
    hooks: HashMap<String, Hook>,
    graph: ExecutionGraph,
    channels: ChannelBus,
    store: Arc<dyn CheckpointStore>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("stage", &self.stage)
            .field("waves", &self.graph.waves)
            .field("channels", &self.channels)
            .finish()
    }
}

impl EventDispatcher {
    /// Builds a dispatcher over already validated hooks.
    pub fn new(stage: impl Into<String>, hooks: &[Hook]) -> Self {
        let channels = ChannelBus::from_hooks(hooks);
        let graph = ExecutionGraph::build(hooks, &channels.listener_names());
        Self {
            stage: stage.into(),
            hooks: hooks.iter().map(|h| (h.name.clone(), h.clone())).collect(),
            graph,
            channels,
            store: Arc::new(MemoryCheckpointStore::new()),
            timeout: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    /// Caps the total time spent across all waves.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn events(&self) -> &BTreeMap<String, Event> {
        &self.graph.events
    }

    pub fn waves(&self) -> &[Vec<String>] {
        &self.graph.waves
    }

    pub fn action_plans(&self) -> &[ActionPlan] {
        &self.graph.plans
    }

    pub fn channels(&self) -> &ChannelBus {
        &self.channels
    }

    pub fn hook(&self, name: &str) -> Option<&Hook> {
        self.hooks.get(name)
    }

    /// Runs every non-leaf dispatched hook, wave by wave.
    pub async fn dispatch(&self, context: &StageContext) -> Result<DispatchOutcome, StageError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut outcome = DispatchOutcome::default();
        let mut next_args: HashMap<String, BTreeMap<String, ContextValue>> = HashMap::new();

        for wave in &self.graph.waves {
            if context.shutdown_requested() {
                return Err(StageError::Cancelled {
                    stage: self.stage.clone(),
                });
            }

            let mut join_set: JoinSet<HookOutcome> = JoinSet::new();
            let mut launched = Vec::new();
            for name in wave {
                if outcome.skipped.contains(name) {
                    continue;
                }
                let Some(hook) = self.hooks.get(name) else {
                    continue;
                };
                let input = self.build_input(hook, next_args.remove(name), context);
                let hook = hook.clone();
                let context = context.clone();
                let store = Arc::clone(&self.store);
                launched.push(name.clone());
                join_set.spawn(async move {
                    let result = run_hook(&hook, input, &context, store.as_ref()).await;
                    (hook.name.clone(), result)
                });
            }
            if launched.is_empty() {
                continue;
            }

            let finished = self.drain(&mut join_set, deadline, &launched).await?;
            outcome.waves += 1;

            for (name, result) in finished {
                let value = result.map_err(|err| StageError::execution(&self.stage, &err))?;
                self.complete(&name, value, context, &mut outcome, &mut next_args)
                    .await?;
            }
        }

        Ok(outcome)
    }

    async fn drain(
        &self,
        join_set: &mut JoinSet<HookOutcome>,
        deadline: Option<Instant>,
        launched: &[String],
    ) -> Result<Vec<HookOutcome>, StageError> {
        let mut finished = Vec::with_capacity(launched.len());
        loop {
            let joined = match deadline {
                Some(deadline) => {
                    tokio::select! {
                        joined = join_set.join_next() => joined,
                        _ = tokio::time::sleep_until(deadline) => {
                            join_set.abort_all();
                            while join_set.join_next().await.is_some() {}
                            let done: BTreeSet<&String> = finished.iter().map(|(n, _)| n).collect();
                            return Err(StageError::HookTimeout {
                                stage: self.stage.clone(),
                                hooks: launched.iter().filter(|n| !done.contains(n)).cloned().collect(),
                                timeout: self.timeout.unwrap_or_default(),
                            });
                        }
                    }
                }
                None => join_set.join_next().await,
            };
            let Some(joined) = joined else {
                break;
            };
            match joined {
                Ok(outcome) => finished.push(outcome),
                Err(err) => {
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    return Err(StageError::Execution {
                        stage: self.stage.clone(),
                        message: format!("hook task aborted: {err}"),
                        causes: Vec::new(),
                    });
                }
            }
        }
        // Completion order is nondeterministic; apply results in wave order.
        finished.sort_by_key(|(name, _)| launched.iter().position(|n| n == name));
        Ok(finished)
    }

    async fn complete(
        &self,
        name: &str,
        value: ContextValue,
        context: &StageContext,
        outcome: &mut DispatchOutcome,
        next_args: &mut HashMap<String, BTreeMap<String, ContextValue>>,
    ) -> Result<(), StageError> {
        let Some(hook) = self.hooks.get(name) else {
            return Ok(());
        };

        if hook.hook_type == HookType::Condition && !value.is_truthy() {
            tracing::debug!(stage = %self.stage, hook = %name, "Condition false, skipping descendants");
            outcome.skipped.extend(self.graph.descendants(name));
            outcome.outputs.insert(name.to_string(), value);
            return Ok(());
        }

        if let Some(key) = &hook.store_key {
            context.set(key.clone(), value.clone());
        }
        if self.channels.is_notifier(name) {
            self.channels
                .notify(name, &value, context)
                .await
                .map_err(|err| StageError::execution(&self.stage, &err))?;
        }
        if let Some(event) = self.graph.events.get(name) {
            for next in &event.next_map {
                next_args
                    .entry(next.clone())
                    .or_default()
                    .insert(name.to_string(), value.clone());
            }
        }
        outcome.outputs.insert(name.to_string(), value);
        Ok(())
    }

    fn build_input(
        &self,
        hook: &Hook,
        args: Option<BTreeMap<String, ContextValue>>,
        context: &StageContext,
    ) -> ContextValue {
        if hook.hook_type == HookType::Context {
            return ContextValue::Map(context.select(hook.load_keys.iter()));
        }
        match args {
            Some(mut args) if args.len() == 1 => args.pop_first().map(|(_, v)| v).unwrap_or_default(),
            Some(args) if !args.is_empty() => ContextValue::Map(args),
            _ => match hook.load_keys.as_slice() {
                [] => ContextValue::None,
                [key] => context.get(key).unwrap_or_default(),
                keys => ContextValue::Map(context.select(keys.iter())),
            },
        }
    }

    /// Runs every hook of `hook_type` one at a time in declared order.
    pub async fn run_lifecycle(
        &self,
        hook_type: HookType,
        context: &StageContext,
    ) -> Result<BTreeMap<String, ContextValue>, StageError> {
        let mut hooks: Vec<&Hook> = self
            .hooks
            .values()
            .filter(|h| h.hook_type == hook_type)
            .collect();
        hooks.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name)));

        let mut outputs = BTreeMap::new();
        for hook in hooks {
            let input = self.build_input(hook, None, context);
            let value = run_hook(hook, input, context, self.store.as_ref())
                .await
                .map_err(|err| StageError::execution(&self.stage, &err))?;
            if let Some(key) = &hook.store_key {
                context.set(key.clone(), value.clone());
            }
            outputs.insert(hook.name.clone(), value);
        }
        Ok(outputs)
    }
}

/// Awaits `future` under the hook's timeout, if it has one.
async fn within_hook_timeout<T>(
    hook: &Hook,
    future: impl std::future::Future<Output = Result<T, HookError>>,
) -> Result<T, HookError> {
    match hook.timeout {
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| HookError::Timeout {
                hook: hook.qualified_name(),
                timeout,
            })?,
        None => future.await,
    }
}

fn call_value(
    hook: &Hook,
    call: &crate::hooks::ValueFn,
    input: ContextValue,
    context: &StageContext,
) -> crate::hooks::HookFuture<ContextValue> {
    call(HookArgs {
        hook: hook.qualified_name(),
        context: context.clone(),
        input,
    })
}

/// Executes one dispatched hook and returns its output.
pub(crate) async fn run_hook(
    hook: &Hook,
    input: ContextValue,
    context: &StageContext,
    store: &dyn CheckpointStore,
) -> Result<ContextValue, HookError> {
    match &hook.call {
        HookCall::Value(call) => {
            if hook.hook_type == HookType::Transform && hook.fan_out {
                if let ContextValue::List(items) = input {
                    // one deadline covers the whole fan-out
                    let mapped = items
                        .into_iter()
                        .map(|item| call_value(hook, call, item, context));
                    let values = within_hook_timeout(hook, try_join_all(mapped)).await?;
                    return Ok(ContextValue::List(values));
                }
            }
            within_hook_timeout(hook, call_value(hook, call, input, context)).await
        }
        HookCall::Checkpoint { path } => match hook.hook_type {
            HookType::Save => {
                let key = hook
                    .load_keys
                    .first()
                    .ok_or_else(|| HookError::MissingKey(hook.qualified_name()))?;
                let value = context
                    .get(key)
                    .ok_or_else(|| HookError::MissingKey(key.clone()))?;
                let bytes = encode_value(&value)?;
                store.save(path, &bytes).await?;
                tracing::debug!(hook = %hook.qualified_name(), path = %path, bytes = bytes.len(), "Checkpoint saved");
                Ok(ContextValue::Integer(bytes.len() as i64))
            }
            _ => {
                let bytes = store
                    .load(path)
                    .await?
                    .ok_or_else(|| CheckpointError::NotFound(path.clone()))?;
                Ok(decode_value(&bytes)?)
            }
        },
        _ => Ok(ContextValue::None),
    }
}

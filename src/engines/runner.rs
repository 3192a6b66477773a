//! Runs one action or task attempt with its bound before/after/check hooks.

use std::collections::HashMap;

use async_trait::async_trait;

use super::action::{Action, EngineType, PreparedAction};
use super::engine::BeforeSend;
use super::registry::EngineSet;
use super::result::{ActionResult, TimingRecorder, ERROR_STATUS};
use crate::core::{ContextValue, StageContext};
use crate::dispatcher::{ActionPlan, ChannelBus};
use crate::error::HookError;
use crate::hooks::{Hook, HookArgs, HookCall, HookType};

#[derive(Debug, Clone, Default)]
struct HookBindings {
    before: Vec<Hook>,
    after: Vec<Hook>,
    checks: Vec<Hook>,
}

/// The before hooks bound to one action, applied in order.
struct BeforeHooks<'a> {
    runner: &'a ActionRunner,
    hooks: &'a [Hook],
}

#[async_trait]
impl BeforeSend for BeforeHooks<'_> {
    async fn apply(&self, mut action: Action) -> Result<Action, HookError> {
        for hook in self.hooks {
            if let HookCall::Before(call) = &hook.call {
                action = call(action, self.runner.args(hook)).await?;
            }
        }
        Ok(action)
    }
}

/// Executes leaf hooks for a stage. Results are stamped with the stage name.
pub struct ActionRunner {
    stage: String,
    engines: EngineSet,
    context: StageContext,
    leaves: HashMap<String, Hook>,
    actions: HashMap<String, Action>,
    bindings: HashMap<String, HookBindings>,
    channels: ChannelBus,
}

impl ActionRunner {
    pub fn new(stage: impl Into<String>, engines: EngineSet, context: StageContext) -> Self {
        Self {
            stage: stage.into(),
            engines,
            context,
            leaves: HashMap::new(),
            actions: HashMap::new(),
            bindings: HashMap::new(),
            channels: ChannelBus::default(),
        }
    }

    pub fn with_channels(mut self, channels: ChannelBus) -> Self {
        self.channels = channels;
        self
    }

    /// Binds leaf hooks and the before/after/check hooks that target them.
    pub fn bind_hooks<'a>(&mut self, hooks: impl IntoIterator<Item = &'a Hook>) {
        for hook in hooks {
            match hook.hook_type {
                HookType::Action | HookType::Task => {
                    if let Some(action) = hook.request() {
                        self.actions
                            .entry(hook.name.clone())
                            .or_insert_with(|| action.clone());
                    }
                    self.leaves.insert(hook.name.clone(), hook.clone());
                }
                HookType::Before | HookType::After | HookType::Check => {
                    for target in &hook.names {
                        let bindings = self.bindings.entry(target.clone()).or_default();
                        let slot = match hook.hook_type {
                            HookType::Before => &mut bindings.before,
                            HookType::After => &mut bindings.after,
                            _ => &mut bindings.checks,
                        };
                        if !slot.iter().any(|h| h.qualified_name() == hook.qualified_name()) {
                            slot.push(hook.clone());
                            slot.sort_by_key(|h| h.order);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Registers a prepared action with its engine and makes it runnable.
    pub fn add_prepared(&mut self, prepared: PreparedAction) {
        let engine = self.engines.get(prepared.action.engine);
        self.actions
            .insert(prepared.name().to_string(), prepared.action.clone());
        if !self.leaves.contains_key(prepared.name()) {
            let mut hook = Hook::action(prepared.name(), prepared.action.clone());
            hook.stage = prepared.owner.clone();
            self.leaves.insert(prepared.name().to_string(), hook);
        }
        engine.register(prepared);
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Replaces the stored description of an action, e.g. after parameter
    /// optimization rewrote it.
    pub fn set_action(&mut self, action: Action) {
        self.actions.insert(action.name.clone(), action);
    }

    pub fn runnable(&self) -> Vec<String> {
        let mut names: Vec<String> = self.leaves.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn engines(&self) -> &EngineSet {
        &self.engines
    }

    fn args(&self, hook: &Hook) -> HookArgs {
        HookArgs {
            hook: hook.qualified_name(),
            context: self.context.clone(),
            input: ContextValue::None,
        }
    }

    async fn run_task(&self, hook: &Hook) -> ActionResult {
        let clock = self.engines.runtime().clock.clone();
        let mut recorder = TimingRecorder::start(clock.as_ref());
        let mut result = ActionResult::new(&hook.name, EngineType::Task);
        result.action_id = self.engines.runtime().id_generator.next_id();
        recorder.mark_start();
        if let HookCall::Value(call) = &hook.call {
            match call(self.args(hook)).await {
                Ok(value) => {
                    if !value.is_none() {
                        result.body = Some(value.to_json().to_string());
                    }
                }
                Err(err) => {
                    result.error = Some(err.to_string());
                    result.status = Some(ERROR_STATUS);
                }
            }
        }
        result.timings = recorder.finish();
        result
    }

    async fn run_action(&self, name: &str) -> ActionResult {
        let Some(action) = self.actions.get(name).cloned() else {
            let mut result = ActionResult::new(name, EngineType::Task);
            result.error = Some(format!("Action {name} is not bound to stage {}", self.stage));
            result.status = Some(ERROR_STATUS);
            return result;
        };
        let bindings = self.bindings.get(name).cloned().unwrap_or_default();

        let engine = self.engines.get(action.engine);
        let before = BeforeHooks {
            runner: self,
            hooks: &bindings.before,
        };
        let mut result = engine.execute_with(&action, &before).await;

        for hook in &bindings.after {
            if let HookCall::After(call) = &hook.call {
                let snapshot = result.clone();
                match call(snapshot, self.args(hook)).await {
                    Ok(next) => result = next,
                    Err(err) => {
                        if result.error.is_none() {
                            result.error = Some(err.to_string());
                        }
                    }
                }
            }
        }
        for hook in &bindings.checks {
            if let HookCall::Check(check) = &hook.call {
                let outcome = check(&result);
                result.record_check(&hook.name, outcome);
            }
        }
        result
    }

    /// Runs one leaf by name and notifies its channels.
    pub async fn run(&self, name: &str) -> ActionResult {
        let mut result = match self.leaves.get(name) {
            Some(hook) if hook.hook_type == HookType::Task => self.run_task(hook).await,
            _ => self.run_action(name).await,
        };
        result.stage = self.stage.clone();

        if self.channels.is_notifier(name) {
            let value = ContextValue::from_serializable(&result).unwrap_or_default();
            if let Err(err) = self.channels.notify(name, &value, &self.context).await {
                tracing::warn!(stage = %self.stage, action = %name, error = %err, "Channel listener failed");
            }
        }
        result
    }

    /// Runs every step of a plan back to back.
    pub async fn run_plan(&self, plan: &ActionPlan) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            results.push(self.run(step).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::core::RuntimeContext;
    use crate::hooks::HookArgs;

    async fn ok_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        let reply = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
                        if socket.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        address
    }

    fn runner() -> ActionRunner {
        ActionRunner::new(
            "execute",
            EngineSet::new(2, RuntimeContext::default()),
            StageContext::new(),
        )
    }

    #[tokio::test]
    async fn test_hooks_wrap_the_request() {
        let address = ok_server().await;
        let mut runner = runner();
        let hooks = vec![
            Hook::action("health", Action::new("health", EngineType::Http, format!("http://{address}/"))),
            Hook::before("tag", &["health"], |action: Action, _args: HookArgs| async move {
                Ok(action.with_header("x-run", "1"))
            }),
            Hook::after("annotate", &["health"], |mut result: ActionResult, _args: HookArgs| async move {
                result.headers.insert("x-seen".into(), "yes".into());
                Ok(result)
            }),
            Hook::check("is_ok", &["health"], |result: &ActionResult| {
                if result.status == Some(200) {
                    Ok(())
                } else {
                    Err(format!("status {:?}", result.status))
                }
            }),
        ];
        runner.bind_hooks(&hooks);

        let result = runner.run("health").await;
        assert!(result.success(), "{:?}", result.error);
        assert_eq!(result.stage, "execute");
        assert_eq!(result.header("x-seen"), Some("yes"));
        assert_eq!(result.checks.len(), 1);
        assert!(result.checks[0].passed);
    }

    #[tokio::test]
    async fn test_before_hooks_run_inside_the_pool_slot() {
        let address = ok_server().await;
        let mut runner = ActionRunner::new(
            "execute",
            EngineSet::new(1, RuntimeContext::default()),
            StageContext::new(),
        );
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (counter, high) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let hooks = vec![
            Hook::action("health", Action::new("health", EngineType::Http, format!("http://{address}/"))),
            Hook::before("slow", &["health"], move |action: Action, _args: HookArgs| {
                let (counter, high) = (Arc::clone(&counter), Arc::clone(&high));
                async move {
                    let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    high.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                    Ok(action)
                }
            }),
        ];
        runner.bind_hooks(&hooks);

        let (first, second) = tokio::join!(runner.run("health"), runner.run("health"));
        assert!(first.success(), "{:?}", first.error);
        assert!(second.success(), "{:?}", second.error);
        // one pool slot, so the second attempt's hook waits for the first request
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_before_hook_fails_attempt() {
        let mut runner = runner();
        let hooks = vec![
            Hook::action("health", Action::new("health", EngineType::Http, "http://127.0.0.1:9/")),
            Hook::before("reject", &["health"], |_action: Action, _args: HookArgs| async move {
                Err(HookError::Failed {
                    hook: "reject".to_string(),
                    message: "no token".to_string(),
                })
            }),
        ];
        runner.bind_hooks(&hooks);
        let result = runner.run("health").await;
        assert_eq!(result.status, Some(ERROR_STATUS));
        assert!(result.error.unwrap().contains("no token"));
    }

    #[tokio::test]
    async fn test_failed_check_marks_result() {
        let address = ok_server().await;
        let mut runner = runner();
        let hooks = vec![
            Hook::action("health", Action::new("health", EngineType::Http, format!("http://{address}/"))),
            Hook::check("impossible", &["health"], |result: &ActionResult| {
                if result.status == Some(999) {
                    Ok(())
                } else {
                    Err("status was not 999".to_string())
                }
            }),
        ];
        runner.bind_hooks(&hooks);
        let result = runner.run("health").await;
        assert!(!result.success());
        assert!(result.error.unwrap().contains("Check"));
    }

    #[tokio::test]
    async fn test_task_runs_in_place_of_request() {
        let mut runner = runner();
        let hooks = vec![Hook::task("compute", |_args: HookArgs| async {
            Ok(ContextValue::Integer(3))
        })];
        runner.bind_hooks(&hooks);
        let result = runner.run("compute").await;
        assert_eq!(result.engine, EngineType::Task);
        assert_eq!(result.body.as_deref(), Some("3"));
        assert!(result.timings.is_monotone());
    }

    #[tokio::test]
    async fn test_plan_runs_steps_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut runner = runner();
        let mut hooks = Vec::new();
        for name in ["login", "browse"] {
            let order = Arc::clone(&order);
            hooks.push(Hook::task(name, move |args: HookArgs| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push(args.hook);
                    Ok(ContextValue::None)
                }
            }));
        }
        runner.bind_hooks(&hooks);
        let plan = ActionPlan {
            name: "browse".into(),
            steps: vec!["login".into(), "browse".into()],
            order: 0,
            weight: 1.0,
        };
        let results = runner.run_plan(&plan).await;
        assert_eq!(results.len(), 2);
        assert_eq!(*order.lock(), vec![".login".to_string(), ".browse".to_string()]);
    }

    #[tokio::test]
    async fn test_unbound_action_fails() {
        let result = runner().run("missing").await;
        assert_eq!(result.status, Some(ERROR_STATUS));
    }
}

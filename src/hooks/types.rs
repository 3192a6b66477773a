use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::core::{ContextValue, StageContext};
use crate::engines::{Action, ActionResult};
use crate::error::HookError;

/// Declared kind of a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    Action,
    Task,
    Setup,
    Teardown,
    Before,
    After,
    Check,
    Event,
    Transform,
    Condition,
    Context,
    Save,
    Load,
    Channel,
    Metric,
    Validate,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::Action => "action",
            HookType::Task => "task",
            HookType::Setup => "setup",
            HookType::Teardown => "teardown",
            HookType::Before => "before",
            HookType::After => "after",
            HookType::Check => "check",
            HookType::Event => "event",
            HookType::Transform => "transform",
            HookType::Condition => "condition",
            HookType::Context => "context",
            HookType::Save => "save",
            HookType::Load => "load",
            HookType::Channel => "channel",
            HookType::Metric => "metric",
            HookType::Validate => "validate",
        }
    }

    /// Dispatch priority; lower runs first. `None` for hooks the dispatcher
    /// does not schedule on its own (they are bound to actions or stages).
    pub fn priority(&self) -> Option<u8> {
        match self {
            HookType::Context => Some(0),
            HookType::Load => Some(1),
            HookType::Event | HookType::Transform | HookType::Condition => Some(2),
            HookType::Save => Some(3),
            HookType::Action | HookType::Task => Some(4),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, HookType::Action | HookType::Task)
    }

    /// Kinds that must name at least one target.
    pub fn requires_targets(&self) -> bool {
        matches!(self, HookType::Before | HookType::After | HookType::Check)
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments handed to value-producing hooks.
#[derive(Debug, Clone)]
pub struct HookArgs {
    /// Fully-qualified name of the hook being called.
    pub hook: String,
    pub context: StageContext,
    /// Output of the predecessor hook(s), or the loaded context value.
    pub input: ContextValue,
}

pub type HookFuture<T> = BoxFuture<'static, Result<T, HookError>>;
pub type ValueFn = Arc<dyn Fn(HookArgs) -> HookFuture<ContextValue> + Send + Sync>;
pub type BeforeFn = Arc<dyn Fn(Action, HookArgs) -> HookFuture<Action> + Send + Sync>;
pub type AfterFn = Arc<dyn Fn(ActionResult, HookArgs) -> HookFuture<ActionResult> + Send + Sync>;
pub type CheckFn = Arc<dyn Fn(&ActionResult) -> Result<(), String> + Send + Sync>;
pub type MetricFn = Arc<dyn Fn(&[ActionResult]) -> f64 + Send + Sync>;

/// What a hook does when called.
#[derive(Clone)]
pub enum HookCall {
    Value(ValueFn),
    Before(BeforeFn),
    After(AfterFn),
    Check(CheckFn),
    Metric(MetricFn),
    Request(Box<Action>),
    Checkpoint { path: String },
    Channel { notify: Vec<String>, listen: Vec<String> },
}

impl HookCall {
    fn label(&self) -> &'static str {
        match self {
            HookCall::Value(_) => "value",
            HookCall::Before(_) => "before",
            HookCall::After(_) => "after",
            HookCall::Check(_) => "check",
            HookCall::Metric(_) => "metric",
            HookCall::Request(_) => "request",
            HookCall::Checkpoint { .. } => "checkpoint",
            HookCall::Channel { .. } => "channel",
        }
    }
}

/// A hook as a value: `{type, name, stage, order, pre, targets, call}`.
#[derive(Clone)]
pub struct Hook {
    pub hook_type: HookType,
    pub name: String,
    /// Owning stage, filled in when the hook is attached to a stage.
    pub stage: String,
    pub order: u32,
    pub pre: bool,
    /// Targets or dependencies, by hook name within the stage.
    pub names: Vec<String>,
    pub load_keys: Vec<String>,
    pub store_key: Option<String>,
    pub timeout: Option<Duration>,
    pub fan_out: bool,
    pub weight: Option<f64>,
    pub call: HookCall,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("hook_type", &self.hook_type)
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("order", &self.order)
            .field("pre", &self.pre)
            .field("names", &self.names)
            .field("call", &self.call.label())
            .finish()
    }
}

pub(crate) fn value_fn<F, Fut>(f: F) -> ValueFn
where
    F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

impl Hook {
    fn new(hook_type: HookType, name: impl Into<String>, call: HookCall) -> Self {
        Self {
            hook_type,
            name: name.into(),
            stage: String::new(),
            order: 0,
            pre: false,
            names: Vec::new(),
            load_keys: Vec::new(),
            store_key: None,
            timeout: None,
            fan_out: false,
            weight: None,
            call,
        }
    }

    fn value<F, Fut>(hook_type: HookType, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
    {
        Self::new(hook_type, name, HookCall::Value(value_fn(f)))
    }

    /// A protocol request executed by an engine.
    pub fn action(name: impl Into<String>, action: Action) -> Self {
        let name = name.into();
        let mut action = action;
        action.name = name.clone();
        Self::new(HookType::Action, name, HookCall::Request(Box::new(action)))
    }

    /// A plain coroutine executed in place of a protocol request.
    pub fn task<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
    {
        Self::value(HookType::Task, name, f)
    }

    pub fn setup<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
    {
        Self::value(HookType::Setup, name, f)
    }

    pub fn teardown<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
    {
        Self::value(HookType::Teardown, name, f)
    }

    pub fn event<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
    {
        Self::value(HookType::Event, name, f)
    }

    pub fn transform<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
    {
        Self::value(HookType::Transform, name, f)
    }

    pub fn condition<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
    {
        Self::value(HookType::Condition, name, f)
    }

    pub fn context<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
    {
        Self::value(HookType::Context, name, f)
    }

    pub fn validate<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextValue, HookError>> + Send + 'static,
    {
        Self::value(HookType::Validate, name, f)
    }

    pub fn before<F, Fut>(name: impl Into<String>, targets: &[&str], f: F) -> Self
    where
        F: Fn(Action, HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Action, HookError>> + Send + 'static,
    {
        let call: BeforeFn = Arc::new(move |action, args| f(action, args).boxed());
        Self::new(HookType::Before, name, HookCall::Before(call)).targets(targets)
    }

    pub fn after<F, Fut>(name: impl Into<String>, targets: &[&str], f: F) -> Self
    where
        F: Fn(ActionResult, HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResult, HookError>> + Send + 'static,
    {
        let call: AfterFn = Arc::new(move |result, args| f(result, args).boxed());
        Self::new(HookType::After, name, HookCall::After(call)).targets(targets)
    }

    /// A post-action assertion; `Err(message)` marks the result as failed.
    pub fn check<F>(name: impl Into<String>, targets: &[&str], f: F) -> Self
    where
        F: Fn(&ActionResult) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::new(HookType::Check, name, HookCall::Check(Arc::new(f))).targets(targets)
    }

    /// Custom metric over the results of `targets` (all results when empty).
    pub fn metric<F>(name: impl Into<String>, targets: &[&str], f: F) -> Self
    where
        F: Fn(&[ActionResult]) -> f64 + Send + Sync + 'static,
    {
        Self::new(HookType::Metric, name, HookCall::Metric(Arc::new(f))).targets(targets)
    }

    /// Writes context `key` to the checkpoint at `path`.
    pub fn save(name: impl Into<String>, key: impl Into<String>, path: impl Into<String>) -> Self {
        let mut hook = Self::new(
            HookType::Save,
            name,
            HookCall::Checkpoint { path: path.into() },
        );
        hook.load_keys = vec![key.into()];
        hook
    }

    /// Reads the checkpoint at `path` into context `key`.
    pub fn load(name: impl Into<String>, key: impl Into<String>, path: impl Into<String>) -> Self {
        let mut hook = Self::new(
            HookType::Load,
            name,
            HookCall::Checkpoint { path: path.into() },
        );
        hook.store_key = Some(key.into());
        hook
    }

    pub fn channel(name: impl Into<String>, notify: &[&str], listen: &[&str]) -> Self {
        Self::new(
            HookType::Channel,
            name,
            HookCall::Channel {
                notify: notify.iter().map(|s| s.to_string()).collect(),
                listen: listen.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    pub fn targets(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Declares hooks this one depends on (or wraps, when `pre` is set).
    pub fn depends_on(self, names: &[&str]) -> Self {
        self.targets(names)
    }

    pub fn order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// Runs this hook ahead of its targets instead of after them.
    pub fn pre(mut self) -> Self {
        self.pre = true;
        self
    }

    pub fn load_key(mut self, key: impl Into<String>) -> Self {
        self.load_keys.push(key.into());
        self
    }

    pub fn store(mut self, key: impl Into<String>) -> Self {
        self.store_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Applies a transform element-wise when its input is a list.
    pub fn fan_out(mut self) -> Self {
        self.fan_out = true;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.stage, self.name)
    }

    pub fn request(&self) -> Option<&Action> {
        match &self.call {
            HookCall::Request(action) => Some(action),
            _ => None,
        }
    }

    pub fn channel_members(&self) -> Option<(&[String], &[String])> {
        match &self.call {
            HookCall::Channel { notify, listen } => Some((notify, listen)),
            _ => None,
        }
    }

    /// Hook weight, falling back to the action's declared weight.
    pub fn effective_weight(&self) -> f64 {
        self.weight
            .or_else(|| self.request().and_then(|a| a.metadata.weight))
            .unwrap_or(1.0)
    }
}

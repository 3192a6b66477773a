//! Structural validation of a stage's hook set.

use std::collections::{HashMap, HashSet};

use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

use super::types::{Hook, HookType};
use crate::error::{ErrorKind, GraphError};
use crate::stages::StageType;

/// Method names the stage lifecycle owns; hooks may not reuse them.
pub const RESERVED_METHODS: &[&str] = &[
    "run",
    "transition",
    "split",
    "setup",
    "execute",
    "optimize",
    "analyze",
    "checkpoint",
    "submit",
    "teardown",
    "validate",
    "wait",
    "complete",
    "error",
];

/// A single hook validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDiagnostic {
    pub code: String,
    pub kind: ErrorKind,
    pub stage: String,
    pub hook: String,
    pub message: String,
}

impl HookDiagnostic {
    fn new(code: &str, stage: &str, hook: &str, message: impl Into<String>) -> Self {
        let kind = if code == "H003" {
            ErrorKind::ReservedMethod
        } else {
            ErrorKind::HookValidation
        };
        Self {
            code: code.to_string(),
            kind,
            stage: stage.to_string(),
            hook: hook.to_string(),
            message: message.into(),
        }
    }

    pub fn to_error(&self) -> GraphError {
        match self.kind {
            ErrorKind::ReservedMethod => GraphError::ReservedMethod {
                stage: self.stage.clone(),
                method: self.hook.clone(),
            },
            _ => GraphError::HookValidation {
                stage: self.stage.clone(),
                hook: self.hook.clone(),
                reason: format!("[{}] {}", self.code, self.message),
            },
        }
    }
}

/// Aggregated result of hook validation across one or more stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookReport {
    pub diagnostics: Vec<HookDiagnostic>,
}

impl HookReport {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn merge(&mut self, other: HookReport) {
        self.diagnostics.extend(other.diagnostics);
    }

    /// Fails with the first finding.
    pub fn into_result(self) -> Result<(), GraphError> {
        match self.diagnostics.first() {
            Some(diagnostic) => Err(diagnostic.to_error()),
            None => Ok(()),
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

fn allowed_in(hook_type: HookType, stage_type: StageType) -> bool {
    match hook_type {
        HookType::Action | HookType::Task => matches!(
            stage_type,
            StageType::Setup | StageType::Execute | StageType::Optimize
        ),
        HookType::Before | HookType::After | HookType::Check => matches!(
            stage_type,
            StageType::Setup | StageType::Execute | StageType::Optimize
        ),
        HookType::Metric => stage_type == StageType::Analyze,
        _ => true,
    }
}

/// Validates one stage's hooks: naming, duplicates, reserved methods,
/// targets, channel shape, placement and dependency cycles.
pub fn validate_stage_hooks(stage: &str, stage_type: StageType, hooks: &[Hook]) -> HookReport {
    let mut report = HookReport::default();
    let mut by_name: HashMap<&str, &Hook> = HashMap::new();

    for hook in hooks {
        if !valid_name(&hook.name) {
            report.diagnostics.push(HookDiagnostic::new(
                "H002",
                stage,
                &hook.name,
                "hook names must be non-empty identifiers without '.'",
            ));
        }
        if RESERVED_METHODS.contains(&hook.name.as_str()) {
            report.diagnostics.push(HookDiagnostic::new(
                "H003",
                stage,
                &hook.name,
                format!("'{}' is a reserved stage method", hook.name),
            ));
        }
        if by_name.insert(hook.name.as_str(), hook).is_some() {
            report.diagnostics.push(HookDiagnostic::new(
                "H001",
                stage,
                &hook.name,
                "duplicate hook name",
            ));
        }
        if !allowed_in(hook.hook_type, stage_type) {
            report.diagnostics.push(HookDiagnostic::new(
                "H009",
                stage,
                &hook.name,
                format!("{} hooks are not allowed in {} stages", hook.hook_type, stage_type),
            ));
        }
    }

    for hook in hooks {
        check_targets(stage, hook, &by_name, &mut report);
    }

    let channels: Vec<&Hook> = hooks
        .iter()
        .filter(|h| h.hook_type == HookType::Channel)
        .collect();
    for channel in &channels {
        check_channel(stage, channel, &by_name, &mut report);
    }
    check_listener_exclusive(stage, &channels, &mut report);

    if let Some(cycle) = dependency_cycle(hooks) {
        report.diagnostics.push(HookDiagnostic::new(
            "H010",
            stage,
            &cycle,
            "hook dependencies form a cycle",
        ));
    }

    report
}

fn check_targets(stage: &str, hook: &Hook, by_name: &HashMap<&str, &Hook>, report: &mut HookReport) {
    if hook.hook_type.requires_targets() && hook.names.is_empty() {
        report.diagnostics.push(HookDiagnostic::new(
            "H004",
            stage,
            &hook.name,
            format!("{} hooks must name at least one target", hook.hook_type),
        ));
    }

    // Metric hooks target actions in other stages by name.
    if matches!(hook.hook_type, HookType::Metric | HookType::Channel) {
        return;
    }

    for target in &hook.names {
        if target == &hook.name {
            report.diagnostics.push(HookDiagnostic::new(
                "H011",
                stage,
                &hook.name,
                "a hook cannot target itself",
            ));
            continue;
        }
        let Some(found) = by_name.get(target.as_str()) else {
            report.diagnostics.push(HookDiagnostic::new(
                "H005",
                stage,
                &hook.name,
                format!("unknown target '{}'", target),
            ));
            continue;
        };

        let compatible = match hook.hook_type {
            HookType::Before | HookType::After | HookType::Check => found.hook_type.is_leaf(),
            HookType::Action | HookType::Task => found.hook_type.priority().is_some(),
            HookType::Event
            | HookType::Transform
            | HookType::Condition
            | HookType::Context
            | HookType::Save
            | HookType::Load => found.hook_type.priority().is_some() && !found.hook_type.is_leaf(),
            _ => false,
        };
        if !compatible {
            report.diagnostics.push(HookDiagnostic::new(
                "H006",
                stage,
                &hook.name,
                format!(
                    "{} hooks cannot target {} hook '{}'",
                    hook.hook_type, found.hook_type, target
                ),
            ));
        }
    }
}

fn check_channel(stage: &str, channel: &Hook, by_name: &HashMap<&str, &Hook>, report: &mut HookReport) {
    let Some((notify, listen)) = channel.channel_members() else {
        return;
    };
    if notify.is_empty() || listen.is_empty() {
        report.diagnostics.push(HookDiagnostic::new(
            "H007",
            stage,
            &channel.name,
            "channels need at least one notifier and one listener",
        ));
    }
    for member in notify.iter().chain(listen.iter()) {
        if !by_name.contains_key(member.as_str()) {
            report.diagnostics.push(HookDiagnostic::new(
                "H005",
                stage,
                &channel.name,
                format!("unknown channel member '{}'", member),
            ));
        }
    }
    for notifier in notify {
        if listen.contains(notifier) {
            report.diagnostics.push(HookDiagnostic::new(
                "H008",
                stage,
                &channel.name,
                format!("'{}' cannot both notify and listen on the same channel", notifier),
            ));
        }
    }
    for listener in listen {
        if let Some(found) = by_name.get(listener.as_str()) {
            if found.hook_type != HookType::Event {
                report.diagnostics.push(HookDiagnostic::new(
                    "H006",
                    stage,
                    &channel.name,
                    format!("listener '{}' must be an event hook", listener),
                ));
            }
        }
    }
}

/// A listener is invoked only through its channels, so it may not also be
/// a notifier anywhere in the stage.
fn check_listener_exclusive(stage: &str, channels: &[&Hook], report: &mut HookReport) {
    let mut listeners = HashSet::new();
    let mut notifiers = HashSet::new();
    for channel in channels {
        if let Some((notify, listen)) = channel.channel_members() {
            notifiers.extend(notify.iter().cloned());
            listeners.extend(listen.iter().cloned());
        }
    }
    let mut both: Vec<&String> = listeners.intersection(&notifiers).collect();
    both.sort();
    for name in both {
        report.diagnostics.push(HookDiagnostic::new(
            "H008",
            stage,
            name,
            "a channel listener cannot notify another channel",
        ));
    }
}

fn dependency_cycle(hooks: &[Hook]) -> Option<String> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut nodes = HashMap::new();
    for hook in hooks {
        if hook.hook_type.priority().is_some() {
            nodes.insert(hook.name.as_str(), graph.add_node(hook.name.as_str()));
        }
    }
    for hook in hooks {
        let Some(&to) = nodes.get(hook.name.as_str()) else {
            continue;
        };
        for target in &hook.names {
            if let Some(&from) = nodes.get(target.as_str()) {
                if hook.pre {
                    graph.add_edge(to, from, ());
                } else {
                    graph.add_edge(from, to, ());
                }
            }
        }
    }
    match petgraph::algo::toposort(&graph, None) {
        Ok(_) => None,
        Err(cycle) => Some(graph[cycle.node_id()].to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ContextValue;
    use crate::engines::{Action, EngineType};
    use crate::hooks::HookArgs;

    fn event(name: &str) -> Hook {
        Hook::event(name, |_args: HookArgs| async { Ok(ContextValue::None) })
    }

    fn action(name: &str) -> Hook {
        Hook::action(name, Action::new(name, EngineType::Http, "http://h/"))
    }

    fn codes(report: &HookReport) -> Vec<&str> {
        report.diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn test_valid_hook_set() {
        let hooks = vec![
            event("seed"),
            event("double").depends_on(&["seed"]),
            action("get_users"),
            Hook::check("ok", &["get_users"], |_| Ok(())),
        ];
        let report = validate_stage_hooks("load", StageType::Execute, &hooks);
        assert!(report.is_valid(), "{:?}", report);
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let hooks = vec![event("a"), event("a"), event("bad.name")];
        let report = validate_stage_hooks("s", StageType::Execute, &hooks);
        assert_eq!(codes(&report), vec!["H001", "H002"]);
        let err = report.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HookValidation);
    }

    #[test]
    fn test_reserved_method() {
        let report = validate_stage_hooks("s", StageType::Execute, &[event("run")]);
        let err = report.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReservedMethod);
        assert!(matches!(err, GraphError::ReservedMethod { ref method, .. } if method == "run"));
    }

    #[test]
    fn test_missing_and_unknown_targets() {
        let hooks = vec![
            Hook::check("no_targets", &[], |_| Ok(())),
            event("orphan").depends_on(&["ghost"]),
        ];
        let report = validate_stage_hooks("s", StageType::Execute, &hooks);
        assert_eq!(codes(&report), vec!["H004", "H005"]);
    }

    #[test]
    fn test_target_kind_mismatch() {
        let hooks = vec![
            event("e"),
            Hook::check("chk", &["e"], |_| Ok(())),
            action("a"),
            event("after_a").depends_on(&["a"]),
        ];
        let report = validate_stage_hooks("s", StageType::Execute, &hooks);
        assert_eq!(codes(&report), vec!["H006", "H006"]);
    }

    #[test]
    fn test_channel_rules() {
        let hooks = vec![
            action("producer"),
            event("consumer"),
            Hook::channel("empty", &["producer"], &[]),
            Hook::channel("loop", &["consumer"], &["consumer"]),
        ];
        let report = validate_stage_hooks("s", StageType::Execute, &hooks);
        let found = codes(&report);
        assert!(found.contains(&"H007"));
        assert!(found.contains(&"H008"));
    }

    #[test]
    fn test_placement_rules() {
        let hooks = vec![action("a"), Hook::metric("m", &[], |_| 0.0)];
        let report = validate_stage_hooks("s", StageType::Submit, &hooks);
        assert_eq!(codes(&report), vec!["H009", "H009"]);
        let ok = validate_stage_hooks("s", StageType::Analyze, &[Hook::metric("m", &[], |_| 0.0)]);
        assert!(ok.is_valid());
    }

    #[test]
    fn test_dependency_cycle() {
        let hooks = vec![
            event("a").depends_on(&["b"]),
            event("b").depends_on(&["a"]),
        ];
        let report = validate_stage_hooks("s", StageType::Execute, &hooks);
        assert_eq!(codes(&report), vec!["H010"]);
    }
}

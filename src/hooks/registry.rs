use std::collections::{BTreeMap, HashMap};

use super::types::{Hook, HookType};
use crate::error::GraphError;

/// Immutable index of every hook in a graph, keyed by `Stage.method`.
///
/// Rebuilt per graph load. Workers resolve hooks by name through it, so
/// hooks never cross a worker boundary as data.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    stages: BTreeMap<String, Vec<Hook>>,
    index: HashMap<String, (String, usize)>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage's hooks, stamping each with the stage name.
    pub fn register_stage(&mut self, stage: &str, hooks: Vec<Hook>) -> Result<(), GraphError> {
        if self.stages.contains_key(stage) {
            return Err(GraphError::DuplicateStage(stage.to_string()));
        }
        let mut stamped = Vec::with_capacity(hooks.len());
        for (position, mut hook) in hooks.into_iter().enumerate() {
            hook.stage = stage.to_string();
            let qualified = hook.qualified_name();
            if self
                .index
                .insert(qualified, (stage.to_string(), position))
                .is_some()
            {
                return Err(GraphError::HookValidation {
                    stage: stage.to_string(),
                    hook: hook.name.clone(),
                    reason: "[H001] duplicate hook name".to_string(),
                });
            }
            stamped.push(hook);
        }
        self.stages.insert(stage.to_string(), stamped);
        Ok(())
    }

    pub fn stage_hooks(&self, stage: &str) -> &[Hook] {
        self.stages.get(stage).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, qualified: &str) -> Option<&Hook> {
        let (stage, position) = self.index.get(qualified)?;
        self.stages.get(stage)?.get(*position)
    }

    pub fn find(&self, stage: &str, name: &str) -> Option<&Hook> {
        self.get(&format!("{}.{}", stage, name))
    }

    /// Resolves fully-qualified names, failing on the first unknown one.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Hook>, GraphError> {
        names
            .iter()
            .map(|name| {
                self.get(name).cloned().ok_or_else(|| GraphError::HookValidation {
                    stage: name.split('.').next().unwrap_or_default().to_string(),
                    hook: name.clone(),
                    reason: "[H005] hook not registered".to_string(),
                })
            })
            .collect()
    }

    pub fn of_type(&self, hook_type: HookType) -> impl Iterator<Item = &Hook> {
        self.stages
            .values()
            .flat_map(|hooks| hooks.iter())
            .filter(move |hook| hook.hook_type == hook_type)
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &String> {
        self.stages.keys()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ContextValue;
    use crate::engines::{Action, EngineType};
    use crate::hooks::HookArgs;

    fn registry() -> HookRegistry {
        let mut registry = HookRegistry::new();
        registry
            .register_stage(
                "load",
                vec![
                    Hook::action("get", Action::new("get", EngineType::Http, "http://h/")),
                    Hook::event("seed", |_args: HookArgs| async { Ok(ContextValue::None) }),
                ],
            )
            .unwrap();
        registry
            .register_stage(
                "check",
                vec![Hook::validate("schema", |_args: HookArgs| async {
                    Ok(ContextValue::Bool(true))
                })],
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_lookup_by_qualified_name() {
        let registry = registry();
        let hook = registry.get("load.get").unwrap();
        assert_eq!(hook.stage, "load");
        assert_eq!(hook.qualified_name(), "load.get");
        assert!(registry.find("load", "seed").is_some());
        assert!(registry.get("load.missing").is_none());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_resolve_and_filter() {
        let registry = registry();
        let hooks = registry
            .resolve(&["load.seed".to_string(), "check.schema".to_string()])
            .unwrap();
        assert_eq!(hooks.len(), 2);
        assert!(registry.resolve(&["load.nope".to_string()]).is_err());
        assert_eq!(registry.of_type(HookType::Validate).count(), 1);
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut registry = registry();
        let err = registry.register_stage("load", Vec::new()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateStage(_)));
    }
}

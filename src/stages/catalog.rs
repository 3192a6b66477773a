use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::stage::StageConfig;
use super::types::StageType;
use crate::hooks::{Hook, HookRegistry};

/// Immutable view of every stage of an assembled graph.
///
/// Built once at planning and shared with workers, which rebuild a stage from
/// its name instead of receiving hooks as data.
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    stages: BTreeMap<String, StageConfig>,
    dependents: BTreeMap<String, Vec<String>>,
    hooks: HookRegistry,
}

impl StageCatalog {
    pub fn new(stages: impl IntoIterator<Item = StageConfig>, hooks: HookRegistry) -> Self {
        let stages: BTreeMap<String, StageConfig> =
            stages.into_iter().map(|s| (s.name.clone(), s)).collect();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for stage in stages.values() {
            for dependency in &stage.dependencies {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(stage.name.clone());
            }
        }
        for list in dependents.values_mut() {
            list.sort();
            list.dedup();
        }
        Self {
            stages,
            dependents,
            hooks,
        }
    }

    pub fn config(&self, name: &str) -> Option<&StageConfig> {
        self.stages.get(name)
    }

    pub fn hooks(&self, name: &str) -> &[Hook] {
        self.hooks.stage_hooks(name)
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.stages.keys()
    }

    pub fn configs(&self) -> impl Iterator<Item = &StageConfig> {
        self.stages.values()
    }

    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Execute and Optimize stages a Setup prepares actions for: everything
    /// downstream of it up to the next Setup.
    pub fn setup_candidates(&self, setup: &str) -> Vec<String> {
        self.downstream(setup, &[StageType::Setup], &[StageType::Execute, StageType::Optimize])
    }

    /// Execute stages an Optimize tunes: everything downstream of it up to
    /// the next Setup or Optimize.
    pub fn optimize_targets(&self, optimize: &str) -> Vec<String> {
        self.downstream(
            optimize,
            &[StageType::Setup, StageType::Optimize],
            &[StageType::Execute],
        )
    }

    fn downstream(&self, from: &str, stop_at: &[StageType], collect: &[StageType]) -> Vec<String> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut found: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.dependents(from).iter().map(String::as_str).collect();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            let Some(config) = self.stages.get(name) else {
                continue;
            };
            if stop_at.contains(&config.stage_type) {
                continue;
            }
            if collect.contains(&config.stage_type) {
                found.insert(name.to_string());
            }
            queue.extend(self.dependents(name).iter().map(String::as_str));
        }
        found.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, stage_type: StageType, depends: &[&str]) -> StageConfig {
        let mut config = StageConfig::new(name, stage_type);
        config.dependencies = depends.iter().map(|d| d.to_string()).collect();
        config
    }

    fn catalog() -> StageCatalog {
        StageCatalog::new(
            vec![
                stage("idle", StageType::Idle, &[]),
                stage("prepare", StageType::Setup, &["idle"]),
                stage("tune", StageType::Optimize, &["prepare"]),
                stage("load_a", StageType::Execute, &["tune"]),
                stage("load_b", StageType::Execute, &["prepare"]),
                stage("save", StageType::Checkpoint, &["load_a"]),
                stage("load_c", StageType::Execute, &["save"]),
                stage("again", StageType::Setup, &["load_c"]),
                stage("load_d", StageType::Execute, &["again"]),
            ],
            HookRegistry::new(),
        )
    }

    #[test]
    fn test_dependents_are_sorted() {
        let catalog = catalog();
        assert_eq!(catalog.dependents("prepare"), ["load_b", "tune"]);
        assert!(catalog.dependents("load_d").is_empty());
        assert_eq!(catalog.len(), 9);
    }

    #[test]
    fn test_setup_candidates_stop_at_next_setup() {
        let catalog = catalog();
        assert_eq!(
            catalog.setup_candidates("prepare"),
            vec!["load_a", "load_b", "load_c", "tune"]
        );
        assert_eq!(catalog.setup_candidates("again"), vec!["load_d"]);
    }

    #[test]
    fn test_optimize_targets() {
        let catalog = catalog();
        assert_eq!(catalog.optimize_targets("tune"), vec!["load_a", "load_c"]);
    }
}

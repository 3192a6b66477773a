//! Named extension points resolved at run time: reporters and optimizers.
//!
//! Stages refer to plugins by name only, so a stage rebuilt on a worker finds
//! the same instances the caller registered.

use std::collections::HashMap;
use std::sync::Arc;

use crate::optimizer::Optimizer;
use crate::reporting::Reporter;

#[derive(Default, Clone)]
pub struct PluginRegistry {
    reporters: HashMap<String, Arc<dyn Reporter>>,
    optimizers: HashMap<String, Arc<dyn Optimizer>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("reporters", &self.reporter_names())
            .field("optimizers", &self.optimizer_names())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_reporter(&mut self, name: impl Into<String>, reporter: Arc<dyn Reporter>) {
        self.reporters.insert(name.into(), reporter);
    }

    pub fn register_optimizer(&mut self, name: impl Into<String>, optimizer: Arc<dyn Optimizer>) {
        self.optimizers.insert(name.into(), optimizer);
    }

    pub fn reporter(&self, name: &str) -> Option<Arc<dyn Reporter>> {
        self.reporters.get(name).cloned()
    }

    pub fn optimizer(&self, name: &str) -> Option<Arc<dyn Optimizer>> {
        self.optimizers.get(name).cloned()
    }

    pub fn reporter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.reporters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn optimizer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.optimizers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every registered reporter, ordered by name.
    pub fn reporters(&self) -> Vec<Arc<dyn Reporter>> {
        self.reporter_names()
            .iter()
            .filter_map(|name| self.reporter(name))
            .collect()
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::safe_stop::ShutdownSignal;
use super::value::ContextValue;

#[derive(Debug, Default)]
struct ContextInner {
    values: BTreeMap<String, ContextValue>,
    known_keys: BTreeSet<String>,
}

/// Per-stage key-value bag shared by that stage's hooks.
///
/// Writes are last-write-wins per key. Hooks that need read-modify-write
/// either go through [`StageContext::update`] or serialize via a channel.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    inner: Arc<RwLock<ContextInner>>,
    shutdown: ShutdownSignal,
}

impl StageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let context = Self::new();
        for key in keys {
            context.declare(key);
        }
        context
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn from_values(values: BTreeMap<String, ContextValue>) -> Self {
        let context = Self::new();
        context.extend(values);
        context
    }

    /// Declares a key the stage expects to be present before its hooks run.
    pub fn declare(&self, key: impl Into<String>) {
        self.inner.write().known_keys.insert(key.into());
    }

    pub fn known_keys(&self) -> BTreeSet<String> {
        self.inner.read().known_keys.clone()
    }

    pub fn missing_known_keys(&self) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .known_keys
            .iter()
            .filter(|key| !inner.values.contains_key(*key))
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<ContextValue> {
        self.inner.read().values.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.inner.write().values.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<ContextValue> {
        self.inner.write().values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().values.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().values.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().values.is_empty()
    }

    /// Atomically replaces the value under `key` with `f(current)`.
    pub fn update<F>(&self, key: &str, f: F) -> ContextValue
    where
        F: FnOnce(Option<&ContextValue>) -> ContextValue,
    {
        let mut inner = self.inner.write();
        let next = f(inner.values.get(key));
        inner.values.insert(key.to_string(), next.clone());
        next
    }

    pub fn extend(&self, values: BTreeMap<String, ContextValue>) {
        self.inner.write().values.extend(values);
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn snapshot(&self) -> BTreeMap<String, ContextValue> {
        self.inner.read().values.clone()
    }

    /// The subset of values that may cross a worker boundary.
    pub fn serializable(&self) -> BTreeMap<String, ContextValue> {
        self.inner
            .read()
            .values
            .iter()
            .filter(|(_, v)| v.is_serializable())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Subset of the context restricted to `keys`, skipping absent ones.
    pub fn select<'a, I>(&self, keys: I) -> BTreeMap<String, ContextValue>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let inner = self.inner.read();
        keys.into_iter()
            .filter_map(|k| inner.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Hooks poll this to return promptly once shutdown was requested.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

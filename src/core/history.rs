use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::ContextValue;

/// Values handed from one stage to the next along a single edge.
pub type HistorySlot = BTreeMap<String, ContextValue>;

/// Per-edge history keyed by `(source, destination)`.
///
/// Edges own history, not stages: a stage only sees the merged slots of the
/// edges that point at it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphHistory {
    slots: BTreeMap<(String, String), HistorySlot>,
}

impl GraphHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: &str, destination: &str, slot: HistorySlot) {
        self.slots
            .insert((source.to_string(), destination.to_string()), slot);
    }

    pub fn slot(&self, source: &str, destination: &str) -> Option<&HistorySlot> {
        self.slots
            .get(&(source.to_string(), destination.to_string()))
    }

    /// Union of every slot pointing at `destination`, merged in source-name order.
    pub fn incoming(&self, destination: &str) -> HistorySlot {
        let mut merged = HistorySlot::new();
        for ((_, dest), slot) in &self.slots {
            if dest == destination {
                merge_slot(&mut merged, slot.clone());
            }
        }
        merged
    }

    /// Keys from `required` missing in the union of slots pointing at `destination`.
    pub fn missing(&self, destination: &str, required: &[String]) -> Vec<String> {
        let incoming = self.incoming(destination);
        required
            .iter()
            .filter(|key| !incoming.contains_key(*key))
            .cloned()
            .collect()
    }

    pub fn sources_of(&self, destination: &str) -> Vec<String> {
        self.slots
            .keys()
            .filter(|(_, dest)| dest == destination)
            .map(|(source, _)| source.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Merges `incoming` into `target`. Maps are unioned key by key so per-stage
/// entries (such as results keyed by stage name) from several predecessors
/// survive; any other value is replaced.
pub fn merge_slot(target: &mut HistorySlot, incoming: HistorySlot) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(ContextValue::Map(existing)), ContextValue::Map(other)) => {
                existing.extend(other);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

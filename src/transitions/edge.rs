//! Edges own the history that flows between stages.

use std::collections::BTreeMap;
use std::time::Duration;

use super::keys::{SETUP_ACTIONS, SHARED_ACTIONS};
use crate::core::{ContextValue, GraphHistory, HistorySlot};
use crate::error::StageError;
use crate::stages::{StageConfig, StageType};

/// A directed `source -> destination` arrow. Firing it runs the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub source: String,
    pub source_type: StageType,
    pub destination: String,
    pub destination_type: StageType,
    /// Keys the source needs in its incoming history before it runs.
    pub requires: Vec<String>,
    /// Keys copied out of the source's context into the next slot.
    pub provides: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Edge {
    pub fn between(source: &StageConfig, destination: &StageConfig) -> Self {
        Self {
            source: source.name.clone(),
            source_type: source.stage_type,
            destination: destination.name.clone(),
            destination_type: destination.stage_type,
            requires: source.requires_keys(),
            provides: source.provides_keys(),
            timeout: source.timeout,
        }
    }

    /// Fails with the first required key missing from the source's incoming history.
    pub fn check_requires(&self, history: &GraphHistory) -> Result<(), StageError> {
        match history.missing(&self.source, &self.requires).into_iter().next() {
            Some(key) => Err(StageError::MissingRequirement {
                stage: self.source.clone(),
                key,
            }),
            None => Ok(()),
        }
    }

    /// The slot handed to the destination: what reached the source, overlaid
    /// with the keys the source provides.
    pub fn build_slot(
        &self,
        incoming: &HistorySlot,
        output: &BTreeMap<String, ContextValue>,
    ) -> HistorySlot {
        let mut slot = incoming.clone();
        for key in &self.provides {
            if let Some(value) = output.get(key) {
                slot.insert(key.clone(), value.clone());
            }
        }
        slot
    }

    /// Restricts `slot` to this edge's share of the work when the source fans
    /// out to `siblings` (sorted destination names of the same type).
    ///
    /// Prepared actions keyed by another sibling are dropped, and the shared
    /// actions are dealt round-robin by sibling index. Entries for stages
    /// further downstream are kept.
    pub fn split(&self, mut slot: HistorySlot, siblings: &[String]) -> HistorySlot {
        let Some(index) = siblings.iter().position(|s| s == &self.destination) else {
            return slot;
        };
        let count = siblings.len();
        if count < 2 {
            return slot;
        }
        if let Some(ContextValue::Map(actions)) = slot.get_mut(SETUP_ACTIONS) {
            actions.retain(|key, _| key == &self.destination || !siblings.contains(key));
            if let Some(ContextValue::List(shared)) = actions.get_mut(SHARED_ACTIONS) {
                let dealt: Vec<ContextValue> = std::mem::take(shared)
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| i % count == index)
                    .map(|(_, value)| value)
                    .collect();
                *shared = dealt;
            }
        }
        slot
    }
}

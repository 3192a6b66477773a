//! The byte boundary between the graph runner and its workers.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::ContextValue;
use crate::engines::PreparedAction;
use crate::error::StageError;
use crate::plugins::PluginRegistry;
use crate::stages::StageInput;
use crate::transitions::{SETUP_ACTIONS, SHARED_ACTIONS};

/// Everything a worker needs to run one copy of a stage.
///
/// Hooks never cross the boundary: the worker looks the stage up by name in
/// the catalog built at planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub stage: String,
    pub context: BTreeMap<String, ContextValue>,
    pub worker_index: usize,
    pub worker_count: usize,
    /// Actions prepared upstream for this stage, shared ones included.
    #[serde(default)]
    pub actions: Vec<PreparedAction>,
    /// Reporter and optimizer plugins the stage may use.
    #[serde(default)]
    pub plugins: Vec<String>,
}

impl WorkerPayload {
    pub fn new(stage: impl Into<String>, context: BTreeMap<String, ContextValue>) -> Self {
        let stage = stage.into();
        let actions = resolved_actions(&stage, &context);
        Self {
            stage,
            context,
            worker_index: 0,
            worker_count: 1,
            actions,
            plugins: Vec::new(),
        }
    }

    pub fn with_worker(mut self, index: usize, count: usize) -> Self {
        self.worker_index = index;
        self.worker_count = count.max(1);
        self
    }

    pub fn with_plugins(mut self, plugins: &PluginRegistry) -> Self {
        self.plugins = plugins.reporter_names();
        self.plugins.extend(plugins.optimizer_names());
        self.plugins.sort();
        self.plugins.dedup();
        self
    }

    pub fn encode(&self) -> Result<Bytes, StageError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| StageError::execution(&self.stage, &e))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Fails when the payload names a plugin this worker's registry lacks.
    pub fn check_plugins(&self, plugins: &PluginRegistry) -> Result<(), StageError> {
        let known: Vec<String> = plugins
            .reporter_names()
            .into_iter()
            .chain(plugins.optimizer_names())
            .collect();
        match self.plugins.iter().find(|p| !known.contains(p)) {
            Some(missing) => Err(StageError::Execution {
                stage: self.stage.clone(),
                message: format!("plugin '{missing}' is not registered on this worker"),
                causes: Vec::new(),
            }),
            None => Ok(()),
        }
    }

    pub fn into_input(self) -> StageInput {
        StageInput {
            context: self.context,
            worker_index: self.worker_index,
            worker_count: self.worker_count,
        }
    }
}

fn resolved_actions(stage: &str, context: &BTreeMap<String, ContextValue>) -> Vec<PreparedAction> {
    let Some(ContextValue::Map(entries)) = context.get(SETUP_ACTIONS) else {
        return Vec::new();
    };
    [stage, SHARED_ACTIONS]
        .iter()
        .filter_map(|key| entries.get(*key))
        .filter_map(|value| value.deserialize_into::<Vec<PreparedAction>>().ok())
        .flatten()
        .collect()
}

/// Encodes a stage output for the trip back to the runner.
pub fn encode_output(stage: &str, output: &BTreeMap<String, ContextValue>) -> Result<Bytes, StageError> {
    serde_json::to_vec(output)
        .map(Bytes::from)
        .map_err(|e| StageError::execution(stage, &e))
}

pub fn decode_output(stage: &str, bytes: &[u8]) -> Result<BTreeMap<String, ContextValue>, StageError> {
    serde_json::from_slice(bytes).map_err(|e| StageError::execution(stage, &e))
}

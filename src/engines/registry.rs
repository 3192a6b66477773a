use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::action::{Action, EngineType, PreparedAction};
use super::engine::{BeforeSend, Engine};
use super::http::HttpEngine;
use super::result::{ActionResult, ERROR_STATUS};
use super::udp::UdpEngine;
use crate::core::RuntimeContext;
use crate::error::EngineError;

/// Stand-in for protocol families without a wire implementation.
pub struct UnsupportedEngine {
    engine_type: EngineType,
}

impl UnsupportedEngine {
    pub fn new(engine_type: EngineType) -> Self {
        Self { engine_type }
    }

    fn error(&self) -> EngineError {
        EngineError::Unsupported(self.engine_type.to_string())
    }
}

#[async_trait]
impl Engine for UnsupportedEngine {
    fn engine_type(&self) -> EngineType {
        self.engine_type
    }

    async fn prepare(&self, _action: &Action, _owner: &str) -> Result<PreparedAction, EngineError> {
        Err(self.error())
    }

    fn register(&self, _prepared: PreparedAction) {}

    fn prepared(&self, _name: &str) -> Option<PreparedAction> {
        None
    }

    fn registered(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute_with(&self, action: &Action, _before: &dyn BeforeSend) -> ActionResult {
        let mut result = ActionResult::new(&action.name, self.engine_type);
        result.url = action.url.clone();
        result.status = Some(ERROR_STATUS);
        result.error = Some(self.error().to_string());
        result
    }

    async fn check_connection(&self, _name: &str) -> Result<(), EngineError> {
        Err(self.error())
    }

    async fn close(&self) {}

    fn pool_size(&self) -> usize {
        0
    }

    async fn extend_pool(&self, _by: usize) {}

    async fn shrink_pool(&self, _by: usize) {}
}

/// Builds an engine session for `engine_type`.
pub fn create_engine(
    engine_type: EngineType,
    pool_size: usize,
    runtime: RuntimeContext,
) -> Arc<dyn Engine> {
    match engine_type {
        EngineType::Http | EngineType::Graphql => {
            Arc::new(HttpEngine::new(engine_type, pool_size, runtime))
        }
        EngineType::Udp => Arc::new(UdpEngine::new(pool_size, runtime)),
        other => Arc::new(UnsupportedEngine::new(other)),
    }
}

/// Engine sessions owned by one stage, created lazily per engine type.
#[derive(Clone)]
pub struct EngineSet {
    pool_size: usize,
    runtime: RuntimeContext,
    engines: Arc<parking_lot::Mutex<BTreeMap<EngineType, Arc<dyn Engine>>>>,
}

impl EngineSet {
    pub fn new(pool_size: usize, runtime: RuntimeContext) -> Self {
        Self {
            pool_size,
            runtime,
            engines: Arc::new(parking_lot::Mutex::new(BTreeMap::new())),
        }
    }

    pub fn get(&self, engine_type: EngineType) -> Arc<dyn Engine> {
        let mut engines = self.engines.lock();
        Arc::clone(engines.entry(engine_type).or_insert_with(|| {
            create_engine(engine_type, self.pool_size, self.runtime.clone())
        }))
    }

    pub fn active(&self) -> Vec<Arc<dyn Engine>> {
        self.engines.lock().values().cloned().collect()
    }

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    pub async fn set_pool(&self, size: usize) {
        for engine in self.active() {
            engine.set_pool(size).await;
        }
    }

    pub async fn close(&self) {
        for engine in self.active() {
            engine.close().await;
        }
    }
}

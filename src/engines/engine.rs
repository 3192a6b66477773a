use async_trait::async_trait;

use super::action::{Action, EngineType, PreparedAction};
use super::result::ActionResult;
use crate::error::{EngineError, HookError};

/// Rewrites an action once its engine slot is held, just before it is sent.
#[async_trait]
pub trait BeforeSend: Send + Sync {
    async fn apply(&self, action: Action) -> Result<Action, HookError>;
}

struct Unchanged;

#[async_trait]
impl BeforeSend for Unchanged {
    async fn apply(&self, action: Action) -> Result<Action, HookError> {
        Ok(action)
    }
}

/// The contract every protocol client implements.
///
/// `execute` never fails: transport errors are folded into the returned
/// [`ActionResult`] with an error message and a sentinel status.
#[async_trait]
pub trait Engine: Send + Sync {
    fn engine_type(&self) -> EngineType;

    /// Resolves, frames and registers `action` under its name. Preparing an
    /// already registered action with the same description is a no-op.
    async fn prepare(&self, action: &Action, owner: &str) -> Result<PreparedAction, EngineError>;

    /// Registers an action prepared elsewhere (for example by a Setup stage).
    fn register(&self, prepared: PreparedAction);

    fn prepared(&self, name: &str) -> Option<PreparedAction>;

    /// Names of every registered action, sorted.
    fn registered(&self) -> Vec<String>;

    async fn execute(&self, action: &Action) -> ActionResult {
        self.execute_with(action, &Unchanged).await
    }

    /// Waits for a pool slot, runs `before` on the action, then sends it. The
    /// wait ends when the slot is held, so `before` counts toward the attempt.
    async fn execute_with(&self, action: &Action, before: &dyn BeforeSend) -> ActionResult;

    /// Opens (and drops) one connection to the registered action's address.
    async fn check_connection(&self, name: &str) -> Result<(), EngineError>;

    /// Drains outstanding work and closes every pooled connection. Idempotent.
    async fn close(&self);

    fn pool_size(&self) -> usize;

    async fn extend_pool(&self, by: usize);

    /// Waits for `by` in-flight attempts to finish before retiring their slots.
    async fn shrink_pool(&self, by: usize);

    async fn set_pool(&self, size: usize) {
        let current = self.pool_size();
        if size > current {
            self.extend_pool(size - current).await;
        } else if size < current {
            self.shrink_pool(current - size).await;
        }
    }
}

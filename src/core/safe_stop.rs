use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cooperative shutdown flag shared by the graph runner, workers and hooks.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
    grace_millis: Arc<AtomicU64>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            grace_millis: Arc::new(AtomicU64::new(2_000)),
        }
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Requests shutdown and records how long in-flight work may take to drain.
    pub fn trigger_with_grace(&self, grace: Duration) {
        self.grace_millis
            .store(grace.as_millis() as u64, Ordering::Relaxed);
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_millis.load(Ordering::Relaxed))
    }

    /// A signal cancelled together with this one but which can also be cancelled alone.
    pub fn child(&self) -> ShutdownSignal {
        Self {
            token: self.token.child_token(),
            grace_millis: self.grace_millis.clone(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_with_grace() {
        let signal = ShutdownSignal::new();
        assert_eq!(signal.grace_period(), Duration::from_secs(2));
        signal.trigger_with_grace(Duration::from_millis(250));
        assert!(signal.is_triggered());
        assert_eq!(signal.grace_period(), Duration::from_millis(250));
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = ShutdownSignal::new();
        let child = parent.child();
        child.trigger();
        assert!(child.is_triggered());
        assert!(!parent.is_triggered());

        let other = parent.child();
        parent.trigger();
        assert!(other.is_triggered());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        signal.trigger();
        assert!(handle.await.unwrap());
    }
}

//! Fixed-size connection pool with runtime resizing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::EngineError;

/// Counted pool of reusable connections. The semaphore bounds concurrent
/// attempts; `idle` holds connections returned by finished attempts.
pub struct ConnectionPool<C> {
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<C>>,
    size: AtomicUsize,
}

/// One acquired slot. Dropping it without [`PoolLease::release`] discards the
/// connection but still frees the slot.
pub struct PoolLease<'a, C> {
    pool: &'a ConnectionPool<C>,
    connection: Option<C>,
    _permit: OwnedSemaphorePermit,
}

impl<C> PoolLease<'_, C> {
    /// Takes the idle connection handed out with this lease, if any.
    pub fn take(&mut self) -> Option<C> {
        self.connection.take()
    }

    /// Returns a still-usable connection to the pool.
    pub fn release(mut self, connection: C) {
        self.connection = None;
        if !self.pool.semaphore.is_closed() {
            let mut idle = self.pool.idle.lock();
            if idle.len() < self.pool.size() {
                idle.push(connection);
            }
        }
    }
}

impl<C> ConnectionPool<C> {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::with_capacity(size)),
            size: AtomicUsize::new(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<PoolLease<'_, C>, EngineError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)?;
        let connection = self.idle.lock().pop();
        Ok(PoolLease {
            pool: self,
            connection,
            _permit: permit,
        })
    }

    pub fn extend(&self, by: usize) {
        if by == 0 || self.is_closed() {
            return;
        }
        self.semaphore.add_permits(by);
        self.size.fetch_add(by, Ordering::AcqRel);
    }

    /// Retires `by` slots, never going below one. In-flight attempts finish
    /// first.
    pub async fn shrink(&self, by: usize) {
        let by = by.min(self.size().saturating_sub(1));
        if by == 0 {
            return;
        }
        let Ok(count) = u32::try_from(by) else {
            return;
        };
        if let Ok(permits) = self.semaphore.acquire_many(count).await {
            permits.forget();
            let size = self.size.fetch_sub(by, Ordering::AcqRel) - by;
            self.idle.lock().truncate(size);
        }
    }

    pub async fn set_size(&self, size: usize) {
        let size = size.max(1);
        let current = self.size();
        if size > current {
            self.extend(size - current);
        } else if size < current {
            self.shrink(current - size).await;
        }
    }

    /// Discards every idle connection.
    pub fn reset(&self) {
        self.idle.lock().clear();
    }

    pub fn close(&self) {
        self.semaphore.close();
        self.reset();
    }
}

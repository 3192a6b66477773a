use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

/// Clock and id sources shared by engines, stages and the graph runner.
#[derive(Clone)]
pub struct RuntimeContext {
    pub clock: Arc<dyn Clock>,
    pub id_generator: Arc<dyn IdGenerator>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock::default()),
            id_generator: Arc::new(RealIdGenerator),
        }
    }
}

impl RuntimeContext {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }
}

pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin; never decreases.
    fn monotonic_nanos(&self) -> u64;

    fn now_millis(&self) -> i64;

    fn elapsed_since(&self, since_nanos: u64) -> Duration {
        Duration::from_nanos(self.monotonic_nanos().saturating_sub(since_nanos))
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn monotonic_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

/// Manually advanced clock for deterministic timing tests.
#[derive(Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start_nanos: u64) -> Self {
        Self {
            nanos: AtomicU64::new(start_nanos),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn monotonic_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }

    fn now_millis(&self) -> i64 {
        (self.nanos.load(Ordering::SeqCst) / 1_000_000) as i64
    }
}

pub struct SequentialIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_decreases() {
        let clock = MonotonicClock::default();
        let mut last = clock.monotonic_nanos();
        for _ in 0..100 {
            let now = clock.monotonic_nanos();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        clock.advance(Duration::from_nanos(5));
        assert_eq!(clock.monotonic_nanos(), 15);
        assert_eq!(clock.elapsed_since(10), Duration::from_nanos(5));
        assert_eq!(clock.elapsed_since(100), Duration::ZERO);
    }

    #[test]
    fn test_id_generators() {
        let ids = SequentialIdGenerator::new("stage");
        assert_eq!(ids.next_id(), "stage-0");
        assert_eq!(ids.next_id(), "stage-1");

        let real = RealIdGenerator;
        assert_ne!(real.next_id(), real.next_id());
    }
}

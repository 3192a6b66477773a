use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::action::EngineType;
use crate::core::runtime_context::Clock;

/// Monotonic timestamps (nanoseconds) of one attempt.
///
/// Always satisfies `wait_start <= start <= connect_end <= write_end <= complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timings {
    pub wait_start: u64,
    pub start: u64,
    pub connect_end: u64,
    pub write_end: u64,
    pub complete: u64,
}

impl Timings {
    pub fn is_monotone(&self) -> bool {
        self.wait_start <= self.start
            && self.start <= self.connect_end
            && self.connect_end <= self.write_end
            && self.write_end <= self.complete
    }

    /// Time from first waiting on the pool until the response was read.
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.complete.saturating_sub(self.wait_start))
    }

    pub fn waiting(&self) -> Duration {
        Duration::from_nanos(self.start.saturating_sub(self.wait_start))
    }

    pub fn connecting(&self) -> Duration {
        Duration::from_nanos(self.connect_end.saturating_sub(self.start))
    }

    pub fn writing(&self) -> Duration {
        Duration::from_nanos(self.write_end.saturating_sub(self.connect_end))
    }

    pub fn reading(&self) -> Duration {
        Duration::from_nanos(self.complete.saturating_sub(self.write_end))
    }
}

/// Records timings against a clock, clamping each mark to the previous one.
pub struct TimingRecorder<'a> {
    clock: &'a dyn Clock,
    timings: Timings,
    last: u64,
}

impl<'a> TimingRecorder<'a> {
    /// Starts recording; `wait_start` is taken immediately.
    pub fn start(clock: &'a dyn Clock) -> Self {
        let now = clock.monotonic_nanos();
        Self {
            clock,
            timings: Timings {
                wait_start: now,
                start: now,
                connect_end: now,
                write_end: now,
                complete: now,
            },
            last: now,
        }
    }

    fn mark(&mut self) -> u64 {
        self.last = self.clock.monotonic_nanos().max(self.last);
        self.last
    }

    pub fn mark_start(&mut self) {
        let now = self.mark();
        self.timings.start = now;
        self.timings.connect_end = now;
        self.timings.write_end = now;
        self.timings.complete = now;
    }

    pub fn mark_connect_end(&mut self) {
        let now = self.mark();
        self.timings.connect_end = now;
        self.timings.write_end = now;
        self.timings.complete = now;
    }

    pub fn mark_write_end(&mut self) {
        let now = self.mark();
        self.timings.write_end = now;
        self.timings.complete = now;
    }

    pub fn mark_complete(&mut self) {
        let now = self.mark();
        self.timings.complete = now;
    }

    /// Nanoseconds elapsed since `start`.
    pub fn elapsed_since_start(&self) -> Duration {
        Duration::from_nanos(self.clock.monotonic_nanos().saturating_sub(self.timings.start))
    }

    pub fn finish(mut self) -> Timings {
        self.mark_complete();
        self.timings
    }

    pub fn snapshot(&self) -> Timings {
        self.timings
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Record of a single attempt of an action or task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub name: String,
    pub stage: String,
    pub engine: EngineType,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub checks: Vec<CheckOutcome>,
    pub timings: Timings,
    #[serde(default)]
    pub redirects: u32,
}

/// Status recorded when an attempt raised instead of returning a response.
pub const ERROR_STATUS: u16 = 500;
/// Status recorded when redirects exhausted the total timeout.
pub const TIMEOUT_STATUS: u16 = 408;

impl ActionResult {
    pub fn new(name: impl Into<String>, engine: EngineType) -> Self {
        Self {
            action_id: String::new(),
            name: name.into(),
            stage: String::new(),
            engine,
            url: String::new(),
            method: String::new(),
            status: None,
            headers: BTreeMap::new(),
            body: None,
            error: None,
            checks: Vec::new(),
            timings: Timings::default(),
            redirects: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn elapsed(&self) -> Duration {
        self.timings.total()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Records a failed check; the first one also becomes the result's error.
    pub fn record_check(&mut self, name: &str, outcome: Result<(), String>) {
        match outcome {
            Ok(()) => self.checks.push(CheckOutcome {
                name: name.to_string(),
                passed: true,
                message: None,
            }),
            Err(message) => {
                if self.error.is_none() {
                    self.error = Some(format!("Check {} failed: {}", name, message));
                }
                self.checks.push(CheckOutcome {
                    name: name.to_string(),
                    passed: false,
                    message: Some(message),
                });
            }
        }
    }
}

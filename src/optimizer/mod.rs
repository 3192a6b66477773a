//! Parameter optimization over trial persona runs.

pub mod batch_size;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::personas::PersonaConfig;

pub use batch_size::BatchSizeOptimizer;

/// What one trial run of a candidate configuration achieved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialOutcome {
    pub batch_size: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub elapsed: Duration,
}

impl TrialOutcome {
    /// Successful results per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.succeeded as f64 / secs
        } else {
            0.0
        }
    }
}

/// Runs the target workload once under a candidate configuration.
#[async_trait]
pub trait TrialRunner: Send + Sync {
    async fn run_trial(&self, config: PersonaConfig) -> Result<TrialOutcome, StageError>;
}

/// Parameters an Optimize stage hands to the Execute stage it targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizedParams {
    pub batch_size: usize,
    #[serde(default, with = "crate::config::duration::serde_option_duration")]
    pub batch_interval: Option<Duration>,
}

impl OptimizedParams {
    pub fn apply(&self, config: &mut PersonaConfig) {
        config.batch_size = self.batch_size.max(1);
        if let Some(interval) = self.batch_interval {
            config.batch_interval = interval;
        }
    }
}

#[async_trait]
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &str;

    /// Searches for parameters starting from `base`, evaluating candidates
    /// through `trials`.
    async fn optimize(
        &self,
        base: &PersonaConfig,
        trials: &dyn TrialRunner,
    ) -> Result<OptimizedParams, StageError>;
}

/// Optimizer declaration on an Optimize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    BatchSize {
        #[serde(default = "default_min_batch")]
        min_batch_size: usize,
        #[serde(default = "default_max_batch")]
        max_batch_size: usize,
        #[serde(default = "default_steps")]
        steps: usize,
        #[serde(
            default = "default_trial_time",
            with = "crate::config::duration::serde_duration"
        )]
        trial_time: Duration,
    },
    /// An optimizer registered under `name` in the plugin registry.
    Plugin { name: String },
}

fn default_min_batch() -> usize {
    1
}

fn default_max_batch() -> usize {
    1000
}

fn default_steps() -> usize {
    5
}

fn default_trial_time() -> Duration {
    Duration::from_secs(1)
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::BatchSize {
            min_batch_size: default_min_batch(),
            max_batch_size: default_max_batch(),
            steps: default_steps(),
            trial_time: default_trial_time(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: OptimizerConfig = serde_json::from_str(r#"{"type": "batch_size"}"#).unwrap();
        assert_eq!(config, OptimizerConfig::default());

        let config: OptimizerConfig = serde_json::from_str(
            r#"{"type": "batch_size", "max_batch_size": 64, "trial_time": "250ms"}"#,
        )
        .unwrap();
        match config {
            OptimizerConfig::BatchSize {
                max_batch_size,
                trial_time,
                ..
            } => {
                assert_eq!(max_batch_size, 64);
                assert_eq!(trial_time, Duration::from_millis(250));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_params_apply() {
        let mut config = PersonaConfig::new(10, Duration::from_secs(5));
        OptimizedParams {
            batch_size: 0,
            batch_interval: Some(Duration::from_millis(100)),
        }
        .apply(&mut config);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.batch_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_throughput() {
        let outcome = TrialOutcome {
            batch_size: 4,
            completed: 10,
            succeeded: 8,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(outcome.throughput(), 4.0);
    }
}

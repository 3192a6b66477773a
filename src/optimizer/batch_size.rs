use std::time::Duration;

use async_trait::async_trait;

use super::{OptimizedParams, Optimizer, TrialOutcome, TrialRunner};
use crate::error::StageError;
use crate::personas::PersonaConfig;

/// Grid search over batch sizes, keeping the one with the best successful
/// throughput. Ties go to the smaller batch.
#[derive(Debug, Clone)]
pub struct BatchSizeOptimizer {
    min_batch_size: usize,
    max_batch_size: usize,
    steps: usize,
    trial_time: Duration,
}

impl BatchSizeOptimizer {
    pub fn new(min_batch_size: usize, max_batch_size: usize, steps: usize, trial_time: Duration) -> Self {
        let min_batch_size = min_batch_size.max(1);
        Self {
            min_batch_size,
            max_batch_size: max_batch_size.max(min_batch_size),
            steps: steps.max(1),
            trial_time,
        }
    }

    /// Evenly spaced batch sizes from min to max, both ends included.
    pub fn candidates(&self) -> Vec<usize> {
        if self.steps == 1 || self.min_batch_size == self.max_batch_size {
            return vec![self.max_batch_size];
        }
        let span = (self.max_batch_size - self.min_batch_size) as f64;
        let mut sizes: Vec<usize> = (0..self.steps)
            .map(|i| self.min_batch_size + (span * i as f64 / (self.steps - 1) as f64).round() as usize)
            .collect();
        sizes.dedup();
        sizes
    }
}

#[async_trait]
impl Optimizer for BatchSizeOptimizer {
    fn name(&self) -> &str {
        "batch_size"
    }

    async fn optimize(
        &self,
        base: &PersonaConfig,
        trials: &dyn TrialRunner,
    ) -> Result<OptimizedParams, StageError> {
        let mut best: Option<TrialOutcome> = None;
        for batch_size in self.candidates() {
            let mut config = base.clone();
            config.batch_size = batch_size;
            config.total_time = self.trial_time;
            config.graceful_stop = config.graceful_stop.min(self.trial_time);

            let outcome = trials.run_trial(config).await?;
            tracing::debug!(
                batch_size,
                completed = outcome.completed,
                throughput = outcome.throughput(),
                "Optimizer trial finished"
            );
            if best.map_or(true, |b| outcome.throughput() > b.throughput()) {
                best = Some(outcome);
            }
        }

        let batch_size = match best {
            Some(outcome) if outcome.succeeded > 0 => outcome.batch_size,
            _ => base.batch_size,
        };
        Ok(OptimizedParams {
            batch_size,
            batch_interval: None,
        })
    }
}

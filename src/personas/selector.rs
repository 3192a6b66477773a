//! Choice functions that decide which plans fill a persona's free slots.

use std::time::Duration;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::config::{PersonaConfig, PersonaType};

#[derive(Debug, Clone)]
pub enum Selector {
    /// Round robin restarting at the first plan every batch.
    RoundRobin,
    /// Round robin continuing where the previous batch stopped.
    Sequence { cursor: usize },
    Weighted {
        index: Option<WeightedIndex<f64>>,
        rng: StdRng,
    },
    /// Issues just enough work to track `rps` over the elapsed run time.
    Approximate {
        rps: f64,
        interval: Duration,
        issued: u64,
        cursor: usize,
    },
}

impl Selector {
    /// `weights` must already be normalized and in plan order.
    pub fn new(config: &PersonaConfig, weights: &[f64]) -> Self {
        match config.persona_type {
            PersonaType::Default => Selector::RoundRobin,
            PersonaType::Sequence => Selector::Sequence { cursor: 0 },
            PersonaType::Weighted => Selector::Weighted {
                index: WeightedIndex::new(weights.iter().copied()).ok(),
                rng: StdRng::from_entropy(),
            },
            PersonaType::ApproximateDistribution => Selector::Approximate {
                rps: config.target_rps.unwrap_or(0.0).max(0.0),
                interval: config.batch_interval,
                issued: 0,
                cursor: 0,
            },
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        match self {
            Selector::Weighted { index, .. } => Selector::Weighted {
                index,
                rng: StdRng::seed_from_u64(seed),
            },
            other => other,
        }
    }

    /// Plan indices for up to `slots` new units of work.
    pub fn next_batch(&mut self, slots: usize, plans: usize, elapsed: Duration) -> Vec<usize> {
        if plans == 0 || slots == 0 {
            return Vec::new();
        }
        match self {
            Selector::RoundRobin => (0..slots).map(|i| i % plans).collect(),
            Selector::Sequence { cursor } => {
                let batch = (0..slots).map(|i| (*cursor + i) % plans).collect();
                *cursor = (*cursor + slots) % plans;
                batch
            }
            Selector::Weighted { index, rng } => match index {
                Some(index) => (0..slots).map(|_| index.sample(rng)).collect(),
                None => (0..slots).map(|i| i % plans).collect(),
            },
            Selector::Approximate {
                rps,
                interval,
                issued,
                cursor,
            } => {
                let horizon = (elapsed + *interval).as_secs_f64();
                let target = (*rps * horizon).floor() as u64;
                let count = (target.saturating_sub(*issued) as usize).min(slots);
                *issued += count as u64;
                let batch = (0..count).map(|i| (*cursor + i) % plans).collect();
                *cursor = (*cursor + count) % plans;
                batch
            }
        }
    }
}

/// Normalizes `weights` to sum to one. Non-positive or non-finite weights
/// count as zero; when nothing is left every plan gets the same share.
pub fn normalize_weights(weights: &[f64]) -> Vec<f64> {
    let cleaned: Vec<f64> = weights
        .iter()
        .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
        .collect();
    let total: f64 = cleaned.iter().sum();
    if total <= 0.0 {
        let share = if weights.is_empty() { 0.0 } else { 1.0 / weights.len() as f64 };
        return vec![share; weights.len()];
    }
    cleaned.into_iter().map(|w| w / total).collect()
}

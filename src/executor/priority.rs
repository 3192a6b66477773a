//! Priority-aware bin packing of one generation's stages into worker batches.

use serde::{Deserialize, Serialize};

use crate::stages::{StageConfig, StagePriority};

/// Workers granted to one stage within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub stage: String,
    pub workers: usize,
}

/// Stages launched together; their workers never exceed the pool size.
pub type Batch = Vec<Assignment>;

pub fn batch_workers(batch: &Batch) -> usize {
    batch.iter().map(|a| a.workers).sum()
}

/// Packs `stages` into batches for a pool of `pool_size` workers.
///
/// - Stages that disallow parallelism get one worker and a batch of their own.
/// - Exclusive stages take the whole pool in a batch of their own.
/// - When every remaining stage is Auto and their declared workers fit the
///   pool, they share a single batch with exactly those workers.
/// - Otherwise stages are packed greedily, widest range first, each shrunk
///   from its maximum toward its minimum until it fits the open batch.
pub fn partition(stages: &[&StageConfig], pool_size: usize) -> Vec<Batch> {
    let pool = pool_size.max(1);
    let mut sorted: Vec<&StageConfig> = stages.to_vec();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut batches: Vec<Batch> = Vec::new();
    let mut packable: Vec<&StageConfig> = Vec::new();
    for stage in sorted {
        if !stage.allow_parallel {
            batches.push(vec![Assignment {
                stage: stage.name.clone(),
                workers: 1,
            }]);
        } else if stage.priority == StagePriority::Exclusive {
            batches.push(vec![Assignment {
                stage: stage.name.clone(),
                workers: pool,
            }]);
        } else {
            packable.push(stage);
        }
    }
    if packable.is_empty() {
        return batches;
    }

    if packable.iter().all(|s| s.priority == StagePriority::Auto) {
        let declared: Batch = packable
            .iter()
            .map(|s| Assignment {
                stage: s.name.clone(),
                workers: s.workers.unwrap_or(1).clamp(1, pool),
            })
            .collect();
        if batch_workers(&declared) <= pool {
            batches.push(declared);
            return batches;
        }
    }

    let mut ranked: Vec<(&StageConfig, usize, usize)> = packable
        .into_iter()
        .map(|s| {
            let (min, max) = s.priority.worker_range(pool);
            let target = s.workers.map(|w| w.clamp(min, max)).unwrap_or(max);
            (s, min, target)
        })
        .collect();
    ranked.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.name.cmp(&b.0.name)));

    let mut open: Batch = Vec::new();
    let mut used = 0;
    for (stage, min, target) in ranked {
        let fitting = (min..=target).rev().find(|w| used + w <= pool);
        let workers = match fitting {
            Some(workers) => workers,
            None => {
                batches.push(std::mem::take(&mut open));
                used = 0;
                target
            }
        };
        used += workers;
        open.push(Assignment {
            stage: stage.name.clone(),
            workers,
        });
    }
    if !open.is_empty() {
        batches.push(open);
    }
    batches
}

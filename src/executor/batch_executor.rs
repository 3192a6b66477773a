//! Launching packed batches of stages on the worker pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::payload::{decode_output, WorkerPayload};
use super::priority::{Assignment, Batch};
use super::worker::WorkerPool;
use crate::core::ContextValue;
use crate::error::StageError;
use crate::stages::{merge_worker_outputs, StageEnv, StageType};

pub type StageOutput = BTreeMap<String, ContextValue>;

/// How one stage of a batch ended.
#[derive(Debug)]
pub struct StageRunReport {
    pub stage: String,
    pub workers: usize,
    pub result: Result<StageOutput, StageError>,
    pub elapsed: Duration,
}

/// Runs batches on a shared [`WorkerPool`], never holding more worker slots
/// than the pool has.
pub struct BatchExecutor {
    pool: Arc<WorkerPool>,
    env: StageEnv,
    slots: Arc<Semaphore>,
}

impl BatchExecutor {
    pub fn new(pool: Arc<WorkerPool>, env: StageEnv) -> Self {
        let slots = Arc::new(Semaphore::new(pool.size()));
        Self { pool, env, slots }
    }

    pub fn env(&self) -> &StageEnv {
        &self.env
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Launches every stage of every batch at once; the shared worker slots
    /// bound how many actually run. Results come back in batch order.
    pub async fn execute_batches(
        &self,
        batches: &[Batch],
        inputs: &BTreeMap<String, StageOutput>,
    ) -> Vec<StageRunReport> {
        let runs = batches.iter().flatten().map(|assignment| async move {
            let input = inputs.get(&assignment.stage).cloned().unwrap_or_default();
            let started = Instant::now();
            let result = self.run_assignment(assignment, input).await;
            StageRunReport {
                stage: assignment.stage.clone(),
                workers: assignment.workers,
                result,
                elapsed: started.elapsed(),
            }
        });
        join_all(runs).await
    }

    /// Runs one stage on its assigned workers and merges their outputs.
    ///
    /// Only Execute stages fan out across several copies, and never into more
    /// copies than their persona's batch size. Every other type runs once and
    /// keeps its workers reserved.
    pub async fn run_assignment(&self, assignment: &Assignment, input: StageOutput) -> Result<StageOutput, StageError> {
        let stage = assignment.stage.as_str();
        let workers = assignment.workers.clamp(1, self.pool.size());
        let _permit = self
            .slots
            .acquire_many(workers as u32)
            .await
            .map_err(|_| StageError::Cancelled {
                stage: stage.to_string(),
            })?;

        let copies = match self.env.catalog.config(stage) {
            Some(config) if config.stage_type == StageType::Execute => {
                workers.min(config.persona.batch_size.max(1))
            }
            _ => 1,
        };
        tracing::debug!(stage = %stage, workers, copies, "Launching stage");

        let runs = (0..copies).map(|index| {
            let payload = WorkerPayload::new(stage, input.clone())
                .with_worker(index, copies)
                .with_plugins(&self.env.plugins);
            async move {
                let bytes = self.pool.submit(&payload, &self.env).await?;
                decode_output(stage, &bytes)
            }
        });
        let mut outputs = Vec::with_capacity(copies);
        for result in join_all(runs).await {
            outputs.push(result?);
        }
        merge_worker_outputs(stage, outputs)
    }

    /// Refuses further launches; stages waiting for worker slots fail as cancelled.
    pub fn close(&self) {
        self.slots.close();
    }

    pub async fn shutdown(&self) {
        self.close();
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Barrier;

    use super::*;
    use crate::hooks::{Hook, HookRegistry};
    use crate::personas::{PersonaConfig, PersonaOutput};
    use crate::stages::{Stage, StageBuilder, StageCatalog};
    use crate::transitions::EXECUTE_RESULTS;

    fn executor(stages: Vec<Stage>, workers: usize) -> BatchExecutor {
        let mut hooks = HookRegistry::new();
        let mut configs = Vec::new();
        for stage in stages {
            let name = stage.name().to_string();
            hooks.register_stage(&name, stage.hooks).unwrap();
            configs.push(stage.config);
        }
        let env = StageEnv::new(Arc::new(StageCatalog::new(configs, hooks)));
        BatchExecutor::new(Arc::new(WorkerPool::new(workers).unwrap()), env)
    }

    fn load(name: &str) -> Stage {
        StageBuilder::new(name, StageType::Execute)
            .persona(
                PersonaConfig::new(4, Duration::from_millis(150))
                    .with_batch_interval(Duration::from_millis(10))
                    .with_graceful_stop(Duration::from_millis(50)),
            )
            .hook(Hook::task("compute", |_| async { Ok(ContextValue::from(1i64)) }))
            .build()
    }

    #[tokio::test]
    async fn test_execute_fans_out_and_merges() {
        let executor = executor(vec![load("load")], 2);
        let assignment = Assignment {
            stage: "load".to_string(),
            workers: 2,
        };
        let output = executor.run_assignment(&assignment, StageOutput::new()).await.unwrap();
        let merged: PersonaOutput = output[EXECUTE_RESULTS].as_map().unwrap()["load"]
            .deserialize_into()
            .unwrap();
        assert!(merged.total_results > 0);
        assert_eq!(merged.results.len(), merged.total_results);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_copies_capped_at_batch_size() {
        let calls = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let stage = {
            let (calls, in_flight, peak) = (Arc::clone(&calls), Arc::clone(&in_flight), Arc::clone(&peak));
            StageBuilder::new("load", StageType::Execute)
                .persona(
                    PersonaConfig::new(1, Duration::from_millis(200))
                        .with_batch_interval(Duration::from_millis(10))
                        .with_graceful_stop(Duration::from_millis(50)),
                )
                .hook(Hook::task("compute", move |_| {
                    let (calls, in_flight, peak) = (Arc::clone(&calls), Arc::clone(&in_flight), Arc::clone(&peak));
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(ContextValue::from(1i64))
                    }
                }))
                .build()
        };
        let executor = executor(vec![stage], 4);
        let assignment = Assignment {
            stage: "load".to_string(),
            workers: 4,
        };
        let output = executor.run_assignment(&assignment, StageOutput::new()).await.unwrap();
        let merged: PersonaOutput = output[EXECUTE_RESULTS].as_map().unwrap()["load"]
            .deserialize_into()
            .unwrap();
        assert!(calls.load(Ordering::SeqCst) > 0);
        assert_eq!(merged.total_results, calls.load(Ordering::SeqCst));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_batches_launch_together_and_report_in_order() {
        // every stage waits for all three, so sequential batches never finish
        let barrier = Arc::new(Barrier::new(3));
        let meeting = |name: &str| {
            let barrier = Arc::clone(&barrier);
            StageBuilder::new(name, StageType::Idle)
                .hook(Hook::setup("meet", move |_| {
                    let barrier = Arc::clone(&barrier);
                    async move {
                        barrier.wait().await;
                        Ok(ContextValue::None)
                    }
                }))
                .build()
        };
        let executor = executor(vec![meeting("a"), meeting("b"), meeting("c")], 3);
        let batches = vec![
            vec![
                Assignment {
                    stage: "b".to_string(),
                    workers: 1,
                },
                Assignment {
                    stage: "a".to_string(),
                    workers: 1,
                },
            ],
            vec![Assignment {
                stage: "c".to_string(),
                workers: 1,
            }],
        ];
        let results = tokio::time::timeout(
            Duration::from_secs(5),
            executor.execute_batches(&batches, &BTreeMap::new()),
        )
        .await
        .unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert!(results.iter().all(|r| r.result.is_ok()));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_executor_cancels_launches() {
        let executor = executor(vec![StageBuilder::new("a", StageType::Idle).build()], 1);
        executor.close();
        let assignment = Assignment {
            stage: "a".to_string(),
            workers: 1,
        };
        let err = executor.run_assignment(&assignment, StageOutput::new()).await.unwrap_err();
        assert!(matches!(err, StageError::Cancelled { .. }));
        executor.shutdown().await;
    }
}

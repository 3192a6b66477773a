//! A fixed pool of OS worker threads, each driving its own single-threaded runtime.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::payload::{encode_output, WorkerPayload};
use crate::error::StageError;
use crate::stages::{run_stage, StageEnv};

type Reply = oneshot::Sender<Result<Bytes, StageError>>;

struct Job {
    stage: String,
    payload: Bytes,
    env: StageEnv,
    reply: Reply,
}

/// OS threads that run stage copies handed over as encoded payloads.
///
/// Each thread owns a current-thread tokio runtime, so a stage copy is
/// cooperative inside its worker and parallel across workers.
pub struct WorkerPool {
    size: usize,
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, StageError> {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let active = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let mut threads = Vec::with_capacity(size);
        for index in 0..size {
            let rx = Arc::clone(&rx);
            let active = Arc::clone(&active);
            let shutdown = shutdown.clone();
            let handle = std::thread::Builder::new()
                .name(format!("stampede-worker-{index}"))
                .spawn(move || worker_main(index, rx, active, shutdown))
                .map_err(|e| StageError::ProcessKilled {
                    stage: format!("worker-{index}"),
                    reason: e.to_string(),
                })?;
            threads.push(handle);
        }
        tracing::debug!(workers = size, "Worker pool started");

        Ok(Self {
            size,
            jobs: Mutex::new(Some(tx)),
            threads: Mutex::new(threads),
            active,
            shutdown,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of workers currently running a stage copy.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Runs one stage copy on the next free worker and returns its encoded output.
    pub async fn submit(&self, payload: &WorkerPayload, env: &StageEnv) -> Result<Bytes, StageError> {
        let bytes = payload.encode()?;
        let (reply, response) = oneshot::channel();
        let job = Job {
            stage: payload.stage.clone(),
            payload: bytes,
            env: env.clone(),
            reply,
        };
        let sent = match self.jobs.lock().as_ref() {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        };
        if !sent {
            return Err(StageError::ProcessKilled {
                stage: payload.stage.clone(),
                reason: "worker pool is shut down".to_string(),
            });
        }
        response.await.map_err(|_| StageError::ProcessKilled {
            stage: payload.stage.clone(),
            reason: "worker exited before replying".to_string(),
        })?
    }

    /// Stops accepting work, cancels idle workers and joins every thread.
    pub async fn shutdown(&self) {
        self.jobs.lock().take();
        self.shutdown.cancel();
        let threads: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        let joined = tokio::task::spawn_blocking(move || {
            for handle in threads {
                if handle.join().is_err() {
                    tracing::error!("Worker thread panicked outside a stage");
                }
            }
        })
        .await;
        if let Err(err) = joined {
            tracing::error!(error = %err, "Failed to join worker threads");
        }
        tracing::debug!(workers = self.size, "Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.jobs.lock().take();
        self.shutdown.cancel();
    }
}

fn worker_main(
    index: usize,
    jobs: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(worker = index, error = %err, "Worker runtime failed to start");
            return;
        }
    };

    runtime.block_on(async move {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                job = async { jobs.lock().await.recv().await } => job,
            };
            let Some(job) = next else {
                break;
            };

            active.fetch_add(1, Ordering::SeqCst);
            let stage = job.stage.clone();
            let outcome = AssertUnwindSafe(run_job(job.payload, &job.env))
                .catch_unwind()
                .await;
            active.fetch_sub(1, Ordering::SeqCst);

            let result = outcome.unwrap_or_else(|panic| {
                let reason = panic_message(panic.as_ref());
                tracing::error!(worker = index, stage = %stage, reason = %reason, "Worker panicked");
                Err(StageError::ProcessKilled { stage, reason })
            });
            let _ = job.reply.send(result);
        }
    });
}

async fn run_job(bytes: Bytes, env: &StageEnv) -> Result<Bytes, StageError> {
    let payload = WorkerPayload::decode(&bytes).map_err(|e| StageError::ProcessKilled {
        stage: "unknown".to_string(),
        reason: format!("undecodable payload: {e}"),
    })?;
    payload.check_plugins(&env.plugins)?;
    let stage = payload.stage.clone();
    let output = run_stage(&stage, payload.into_input(), env).await?;
    encode_output(&stage, &output)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

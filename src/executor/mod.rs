//! Worker allocation and parallel stage execution.
//!
//! - [`partition`] packs a generation's stages into batches by priority.
//! - [`WorkerPool`] owns the OS worker threads.
//! - [`WorkerPayload`] is what crosses into a worker, as bytes.
//! - [`BatchExecutor`] launches batches on the pool and merges worker outputs.

pub mod batch_executor;
pub mod payload;
pub mod priority;
pub mod worker;

pub use batch_executor::{BatchExecutor, StageOutput, StageRunReport};
pub use payload::{decode_output, encode_output, WorkerPayload};
pub use priority::{batch_workers, partition, Assignment, Batch};
pub use worker::WorkerPool;

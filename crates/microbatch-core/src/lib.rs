//! Core of the micro-batching engine.
//!
//! Callers submit jobs to a [`Batcher`]; a drain loop driven by a tick
//! stream removes at most `batch_size` jobs per tick from the head of the
//! queue and hands them to a [`BatchProcessor`]. Every job keeps its own
//! status and result so callers still see individual outcomes.
//!
//! - The batcher owns queueing, backpressure and the shutdown state machine.
//! - The processor decides how a batch executes (concurrently, in order,
//!   spawned onto a runtime). It never sees a job twice.
//! - Ticks never overlap: the next tick is pulled only after the previous
//!   batch has settled.
pub mod batcher;
pub mod config;
pub mod error;
pub mod job;
pub mod log;
pub mod processor;
pub mod utils;

#[cfg(feature = "rt-tokio")]
mod tokio_spawner;
#[cfg(feature = "rt-tokio")]
pub use tokio_spawner::{TokioJoinHandle, TokioSpawner};

pub use batcher::{Batcher, BatcherBuilder, BatcherState, DrainLoop, ShutdownSignal};
pub use config::BatcherConfig;
pub use error::{BuildError, JobError, SubmitError};
pub use job::{Job, JobHandle, SubmitJob};
pub use log::{BatchLog, NoopLog, Notice, TracingLog};
pub use processor::{
    BatchProcessor, ConcurrentProcessor, InlineSpawner, JobSpawner, LocalBatchProcessor,
    SequentialProcessor, SpawningProcessor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Lifecycle of a single job.
///
/// Transitions only move forward:
/// `Pending -> InProgress -> Complete | Failed`.
pub enum JobStatus {
    /// Queued and waiting for a tick.
    Pending,
    /// Drained into a batch; its callback is running.
    InProgress,
    /// The callback returned a value.
    Complete,
    /// The callback returned an error or panicked.
    Failed,
}

impl JobStatus {
    /// `true` once the job has a result.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::InProgress => 1,
            JobStatus::Complete => 2,
            JobStatus::Failed => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => JobStatus::Pending,
            1 => JobStatus::InProgress,
            2 => JobStatus::Complete,
            _ => JobStatus::Failed,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in-progress",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

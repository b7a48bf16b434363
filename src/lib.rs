//! Timer-driven micro-batching.
//!
//! Submit jobs one at a time, let a [`Batcher`] coalesce them into batches
//! of at most `batch_size`, and await each job's own outcome.
//!
//! ```no_run
//! use std::time::Duration;
//! use microbatch::{BatcherBuilder, ConcurrentProcessor, SubmitJob};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let batcher = BatcherBuilder::new(Duration::from_millis(100))
//!     .batch_size(16)
//!     .max_batches(4)
//!     .spawn(ConcurrentProcessor)?;
//!
//! let handle = batcher.submit(SubmitJob::new(|| async { Ok::<_, std::io::Error>(42) }))?;
//! assert_eq!(handle.await?, 42);
//!
//! batcher.shutdown().await;
//! # Ok(())
//! # }
//! ```
pub use microbatch_core::{
    BatchLog, BatchProcessor, Batcher, BatcherBuilder, BatcherConfig, BatcherState, BuildError,
    ConcurrentProcessor, DrainLoop, InlineSpawner, Job, JobError, JobHandle, JobSpawner,
    JobStatus, LocalBatchProcessor, NoopLog, Notice, SequentialProcessor, ShutdownSignal,
    SpawningProcessor, SubmitError, SubmitJob, TracingLog,
};
pub use microbatch_core::{config, log, processor, utils};

#[cfg(feature = "rt-tokio")]
pub use microbatch_core::{TokioJoinHandle, TokioSpawner};

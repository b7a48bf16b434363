//! Lifecycle notices and the sink that receives them.
//!
//! The batcher reports what it does through a single-method [`BatchLog`]
//! handed in at construction; there is no global logger of its own. The
//! default sink forwards to `tracing`, which is silent unless a subscriber
//! is installed.
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Observable event in a batcher's life.
pub enum Notice {
    /// The batcher was built and accepts jobs.
    Started {
        batch_size: usize,
        frequency: Duration,
        capacity: Option<usize>,
    },
    /// A tick drained `jobs` jobs; `pending` remain queued.
    Processing { jobs: usize, pending: usize },
    /// A tick found the queue empty.
    Waiting,
    /// Shutdown was requested with `pending` jobs still queued.
    ShutdownRequested { pending: usize },
    /// The queue drained after shutdown and the drain loop stopped.
    ShutdownComplete,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::Started {
                batch_size,
                frequency,
                capacity,
            } => {
                write!(
                    f,
                    "batcher started: up to {batch_size} job(s) every {frequency:?}"
                )?;
                match capacity {
                    Some(capacity) => write!(f, ", capacity {capacity}"),
                    None => f.write_str(", unbounded"),
                }
            }
            Notice::Processing { jobs, pending } => {
                write!(f, "processing {jobs} job(s), {pending} still queued")
            }
            Notice::Waiting => f.write_str("nothing to process, waiting"),
            Notice::ShutdownRequested { pending } => {
                write!(f, "shutdown requested, draining {pending} job(s)")
            }
            Notice::ShutdownComplete => f.write_str("shutdown complete"),
        }
    }
}

/// Receives the batcher's notices.
///
/// Called from whichever thread triggers the event, outside of any internal
/// lock. Closures `Fn(&Notice)` implement it.
pub trait BatchLog: Send + Sync + 'static {
    fn notice(&self, notice: &Notice);
}

impl<F> BatchLog for F
where
    F: Fn(&Notice) + Send + Sync + 'static,
{
    fn notice(&self, notice: &Notice) {
        self(notice)
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Forward notices as `tracing` events.
pub struct TracingLog;

impl BatchLog for TracingLog {
    fn notice(&self, notice: &Notice) {
        match notice {
            Notice::Started {
                batch_size,
                frequency,
                capacity,
            } => tracing::info!(
                batch_size = batch_size,
                frequency = ?frequency,
                capacity = ?capacity,
                "{notice}"
            ),
            Notice::Processing { jobs, pending } => {
                tracing::debug!(jobs = jobs, pending = pending, "{notice}")
            }
            Notice::Waiting => tracing::debug!("{notice}"),
            Notice::ShutdownRequested { pending } => {
                tracing::info!(pending = pending, "{notice}")
            }
            Notice::ShutdownComplete => tracing::info!("{notice}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Discard every notice.
pub struct NoopLog;

impl BatchLog for NoopLog {
    fn notice(&self, _notice: &Notice) {}
}

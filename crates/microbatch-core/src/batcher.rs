//! Batcher engine and builder.
//!
//! Bounded FIFO queue, tick-driven drain, shutdown that drains to
//! completion. How a batch executes is up to the processor.
//!
//! The [`Batcher`] handle is cheap to clone and can be shared across
//! threads; the [`DrainLoop`] is the single consumer of the queue.
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::Shared;
use futures::{FutureExt as _, StreamExt as _};
use pin_project_lite::pin_project;

use crate::{
    config::BatcherConfig,
    error::{BuildError, SubmitError},
    job::{Job, JobHandle, SubmitJob},
    log::{BatchLog, Notice, TracingLog},
    processor::BatchProcessor,
    utils::{TickStream, Ticker},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Shutdown state machine: `Active -> Draining -> Stopped`.
pub enum BatcherState {
    /// Accepting jobs and draining on every tick.
    Active,
    /// Shutdown requested; draining what is left, rejecting new jobs.
    Draining,
    /// The drain loop has stopped, after draining a requested shutdown or
    /// because it went away early. Terminal.
    Stopped,
}

struct Queue<T> {
    jobs: VecDeque<Job<T>>,
    state: BatcherState,
}

/// What one tick should do, decided under the queue lock.
enum Drained<T> {
    Batch { jobs: Vec<Job<T>>, pending: usize },
    Idle,
    Stop,
}

struct Inner<T> {
    config: BatcherConfig,
    capacity: Option<usize>,
    queue: Mutex<Queue<T>>,
    log: Arc<dyn BatchLog>,
    shutdown: ShutdownSignal,
    next_id: AtomicU64,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        // No critical section can panic halfway through an update.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_batch(&self) -> Drained<T> {
        let mut queue = self.lock();
        if queue.jobs.is_empty() {
            if queue.state == BatcherState::Draining {
                queue.state = BatcherState::Stopped;
                return Drained::Stop;
            }
            return Drained::Idle;
        }

        let size = self.config.batch_size.min(queue.jobs.len());
        let jobs = queue.jobs.drain(..size).collect::<Vec<_>>();
        Drained::Batch {
            jobs,
            pending: queue.jobs.len(),
        }
    }

    /// Move `Draining` to `Stopped` once nothing is left.
    fn finish_if_drained(&self) -> bool {
        let mut queue = self.lock();
        if queue.state == BatcherState::Draining && queue.jobs.is_empty() {
            queue.state = BatcherState::Stopped;
            return true;
        }
        false
    }

    /// Stop without draining; returns the jobs that will never run.
    fn abandon(&self) -> VecDeque<Job<T>> {
        let mut queue = self.lock();
        queue.state = BatcherState::Stopped;
        std::mem::take(&mut queue.jobs)
    }
}

pin_project! {
    #[derive(Clone)]
    /// Completes once a requested shutdown has drained the queue.
    ///
    /// Every clone observes the same completion. It also completes if the
    /// drain loop stops for any other reason, including being dropped.
    pub struct ShutdownSignal {
        #[pin]
        inner: Shared<oneshot::Receiver<()>>,
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.project().inner.poll(cx).map(|_| ())
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal").finish_non_exhaustive()
    }
}

/// Handle for submitting jobs and requesting shutdown.
pub struct Batcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Batcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Batcher<T> {
    /// Enqueue a job at the tail of the queue.
    ///
    /// Never waits for processing. Fails with [`SubmitError::ShuttingDown`]
    /// once shutdown was requested and with [`SubmitError::QueueFull`] when
    /// the queue holds `max_batches * batch_size` jobs; the queue is left
    /// untouched in both cases.
    pub fn submit(&self, mut job: SubmitJob<T>) -> Result<JobHandle<T>, SubmitError> {
        let name = job.take_name();
        // Capacity check and append share one critical section.
        let mut queue = self.inner.lock();
        if queue.state != BatcherState::Active {
            return Err(SubmitError::ShuttingDown);
        }
        if let Some(capacity) = self.inner.capacity {
            if queue.jobs.len() >= capacity {
                return Err(SubmitError::QueueFull { capacity });
            }
        }

        let name = name.unwrap_or_else(|| {
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            Cow::Owned(format!("job-{id}"))
        });
        let (job, handle) = job.enqueue(name);
        queue.jobs.push_back(job);
        tracing::trace!(job = handle.name(), pending = queue.jobs.len(), "Enqueued job");
        Ok(handle)
    }

    /// Stop accepting jobs and drain what is queued.
    ///
    /// Idempotent: later calls return the same signal and log nothing.
    pub fn shutdown(&self) -> ShutdownSignal {
        let pending = {
            let mut queue = self.inner.lock();
            if queue.state == BatcherState::Active {
                queue.state = BatcherState::Draining;
                Some(queue.jobs.len())
            } else {
                None
            }
        };
        if let Some(pending) = pending {
            self.inner.log.notice(&Notice::ShutdownRequested { pending });
        }
        self.inner.shutdown.clone()
    }

    /// Number of queued jobs. Jobs of the batch currently running are not
    /// counted.
    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> BatcherState {
        self.inner.lock().state
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() != BatcherState::Active
    }

    /// Absolute job capacity, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    pub fn batch_size(&self) -> usize {
        self.inner.config.batch_size
    }

    pub fn frequency(&self) -> Duration {
        self.inner.config.frequency
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }
}

impl<T> std::fmt::Debug for Batcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.inner.lock();
        f.debug_struct("Batcher")
            .field("config", &self.inner.config)
            .field("state", &queue.state)
            .field("pending", &queue.jobs.len())
            .finish()
    }
}

/// Settles the batcher when the drain loop goes away.
///
/// Owned by the [`DrainLoop`] and then by its running future, so it fires
/// whether the loop finishes, is dropped unpolled, or unwinds out of a
/// processor. Anything still queued is abandoned before the shutdown signal
/// completes.
struct StopGuard<T> {
    inner: Arc<Inner<T>>,
    completed: Option<oneshot::Sender<()>>,
    drained: bool,
}

impl<T> StopGuard<T> {
    fn new(inner: Arc<Inner<T>>, completed: oneshot::Sender<()>) -> Self {
        Self {
            inner,
            completed: Some(completed),
            drained: false,
        }
    }
}

impl<T> Drop for StopGuard<T> {
    fn drop(&mut self) {
        let abandoned = self.inner.abandon();
        if !self.drained {
            tracing::warn!(
                abandoned = abandoned.len(),
                panicking = std::thread::panicking(),
                "Drain loop stopped before shutdown completed"
            );
        }
        // Handles of abandoned jobs resolve before the signal does.
        drop(abandoned);
        if let Some(completed) = self.completed.take() {
            let _ = completed.send(());
        }
    }
}

/// Tick-driven consumer of a batcher's queue.
///
/// Nothing happens until [`DrainLoop::run`] is polled; spawn it on the
/// runtime of your choice or use [`BatcherBuilder::spawn`]. Dropping it
/// without running it stops the batcher: queued jobs are abandoned and
/// further submissions are rejected.
pub struct DrainLoop<Tick, P, T> {
    tick: Tick,
    processor: P,
    guard: StopGuard<T>,
}

impl<Tick, P, T> DrainLoop<Tick, P, T>
where
    Tick: TickStream,
    P: BatchProcessor<T> + Send,
    T: Send + 'static,
{
    /// Drain on every tick until shutdown completes or the tick stream ends.
    pub fn run(self) -> impl Future<Output = ()> + Send {
        let Self {
            tick,
            processor,
            guard,
        } = self;
        run_drain_loop(tick, processor, guard)
    }
}

impl<Tick, P, T> std::fmt::Debug for DrainLoop<Tick, P, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainLoop")
            .field("config", &self.guard.inner.config)
            .finish_non_exhaustive()
    }
}

/// Core loop: wait for a tick, drain one batch, settle it, repeat.
async fn run_drain_loop<Tick, P, T>(
    tick: Tick,
    mut processor: P,
    mut guard: StopGuard<T>,
) where
    Tick: TickStream,
    P: BatchProcessor<T> + Send,
    T: Send + 'static,
{
    let inner = guard.inner.clone();
    futures::pin_mut!(tick);
    loop {
        // The next tick is pulled only after the previous batch settled.
        if tick.next().await.is_none() {
            tracing::debug!("Tick stream ended");
            break;
        }

        match inner.take_batch() {
            Drained::Idle => inner.log.notice(&Notice::Waiting),
            Drained::Stop => {
                guard.drained = true;
                inner.log.notice(&Notice::ShutdownComplete);
                break;
            }
            Drained::Batch { jobs, pending } => {
                inner.log.notice(&Notice::Processing {
                    jobs: jobs.len(),
                    pending,
                });
                processor.process(jobs).await;
                if inner.finish_if_drained() {
                    guard.drained = true;
                    inner.log.notice(&Notice::ShutdownComplete);
                    break;
                }
            }
        }
    }

    tracing::debug!("Drain loop stopped");
    drop(guard);
}

/// Builder for [`Batcher`] and its [`DrainLoop`].
///
/// Defaults: one job per tick, unbounded queue, notices forwarded to
/// `tracing`, ticks from a [`Ticker`] with the configured frequency.
pub struct BatcherBuilder<Tick = Ticker> {
    tick: Tick,
    config: BatcherConfig,
    log: Arc<dyn BatchLog>,
}

impl BatcherBuilder {
    /// Drain at most every `frequency`.
    pub fn new(frequency: Duration) -> BatcherBuilder<Ticker> {
        Self::from_config(BatcherConfig::new(frequency))
    }

    /// Start from a complete configuration.
    pub fn from_config(config: BatcherConfig) -> BatcherBuilder<Ticker> {
        BatcherBuilder {
            tick: Ticker::new(config.frequency),
            config,
            log: Arc::new(TracingLog),
        }
    }
}

impl<Tick> BatcherBuilder<Tick> {
    /// Maximum jobs drained per tick.
    pub fn batch_size(self, batch_size: usize) -> Self {
        let Self {
            tick,
            config,
            log,
        } = self;
        BatcherBuilder {
            tick,
            config: BatcherConfig {
                batch_size,
                ..config
            },
            log,
        }
    }

    /// Queue capacity in batches; `0` means unbounded.
    pub fn max_batches(self, max_batches: usize) -> Self {
        let Self {
            tick,
            config,
            log,
        } = self;
        BatcherBuilder {
            tick,
            config: BatcherConfig {
                max_batches,
                ..config
            },
            log,
        }
    }

    /// Send notices to `log` instead of `tracing`.
    pub fn log<L>(self, log: L) -> Self
    where
        L: BatchLog,
    {
        Self {
            log: Arc::new(log),
            ..self
        }
    }

    /// Replace the tick stream (manual ticks, a runtime interval, ...).
    ///
    /// `frequency` is still validated and reported, but pacing is now up to
    /// `tick`.
    pub fn tick<Tick2>(self, tick: Tick2) -> BatcherBuilder<Tick2>
    where
        Tick2: TickStream,
    {
        let Self {
            tick: _,
            config,
            log,
        } = self;
        BatcherBuilder { tick, config, log }
    }
}

impl<Tick> BatcherBuilder<Tick>
where
    Tick: TickStream,
{
    /// Validate the configuration and create the batcher and its drain loop.
    ///
    /// The batcher accepts jobs right away; they are processed once the
    /// drain loop runs.
    pub fn build<P, T>(self, processor: P) -> Result<(Batcher<T>, DrainLoop<Tick, P, T>), BuildError>
    where
        P: BatchProcessor<T>,
    {
        let Self { tick, config, log } = self;
        config.validate()?;

        let (completed, receiver) = oneshot::channel();
        let inner = Arc::new(Inner {
            capacity: config.capacity(),
            config,
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                state: BatcherState::Active,
            }),
            log,
            shutdown: ShutdownSignal {
                inner: receiver.shared(),
            },
            next_id: AtomicU64::new(1),
        });
        inner.log.notice(&Notice::Started {
            batch_size: config.batch_size,
            frequency: config.frequency,
            capacity: inner.capacity,
        });

        let batcher = Batcher {
            inner: inner.clone(),
        };
        let drain = DrainLoop {
            tick,
            processor,
            guard: StopGuard::new(inner, completed),
        };
        Ok((batcher, drain))
    }

    /// Like [`build`](Self::build), then spawn the drain loop on the current
    /// Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    #[cfg(feature = "rt-tokio")]
    pub fn spawn<P, T>(self, processor: P) -> Result<Batcher<T>, BuildError>
    where
        Tick: 'static,
        P: BatchProcessor<T> + Send + 'static,
        T: Send + 'static,
    {
        let (batcher, drain) = self.build(processor)?;
        tokio::spawn(drain.run());
        Ok(batcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConcurrentProcessor, JobError, JobStatus, NoopLog};
    use futures::FutureExt as _;

    fn unit_job() -> SubmitJob<()> {
        SubmitJob::new(|| async { Ok::<_, std::io::Error>(()) })
    }

    type IdleDrain = DrainLoop<futures::stream::Pending<()>, ConcurrentProcessor, ()>;

    /// The drain loop is returned unpolled; dropping it would stop the batcher.
    fn idle_batcher(batch_size: usize, max_batches: usize) -> (Batcher<()>, IdleDrain) {
        BatcherBuilder::new(Duration::from_secs(1))
            .batch_size(batch_size)
            .max_batches(max_batches)
            .log(NoopLog)
            .tick(futures::stream::pending::<()>())
            .build(ConcurrentProcessor)
            .unwrap()
    }

    #[test]
    fn unnamed_jobs_get_sequential_names() {
        let (batcher, _drain) = idle_batcher(1, 0);
        let first = batcher.submit(unit_job()).unwrap();
        let named = batcher.submit(unit_job().name("flush-cache")).unwrap();
        let second = batcher.submit(unit_job()).unwrap();

        assert_eq!(first.name(), "job-1");
        assert_eq!(named.name(), "flush-cache");
        assert_eq!(second.name(), "job-2");
        assert_eq!(first.status(), JobStatus::Pending);
        assert_eq!(batcher.len(), 3);
    }

    #[test]
    fn rejected_submissions_leave_the_queue_unchanged() {
        let (batcher, _drain) = idle_batcher(2, 1);
        assert_eq!(batcher.capacity(), Some(2));
        batcher.submit(unit_job()).unwrap();
        batcher.submit(unit_job()).unwrap();

        let error = batcher.submit(unit_job()).unwrap_err();
        assert_eq!(error, SubmitError::QueueFull { capacity: 2 });
        assert_eq!(batcher.len(), 2);

        let _signal = batcher.shutdown();
        let error = batcher.submit(unit_job()).unwrap_err();
        assert_eq!(error, SubmitError::ShuttingDown);
        assert_eq!(batcher.len(), 2);
    }

    #[test]
    fn shutdown_moves_to_draining_once() {
        let (batcher, _drain) = idle_batcher(1, 0);
        assert_eq!(batcher.state(), BatcherState::Active);

        let _first = batcher.shutdown();
        let _second = batcher.shutdown();
        assert_eq!(batcher.state(), BatcherState::Draining);
        assert!(batcher.is_shutdown());
    }

    #[test]
    fn unlimited_queue_has_no_capacity() {
        let (batcher, _drain) = idle_batcher(3, 0);
        assert_eq!(batcher.capacity(), None);
        for _ in 0..100 {
            batcher.submit(unit_job()).unwrap();
        }
        assert_eq!(batcher.len(), 100);
    }

    #[test]
    fn take_batch_is_fifo_and_bounded_by_batch_size() {
        let (batcher, _drain) = idle_batcher(2, 0);
        for name in ["a", "b", "c"] {
            batcher.submit(unit_job().name(name)).unwrap();
        }

        let Drained::Batch { jobs, pending } = batcher.inner.take_batch() else {
            panic!("expected a batch");
        };
        let names = jobs.iter().map(Job::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(pending, 1);

        let Drained::Batch { jobs, pending } = batcher.inner.take_batch() else {
            panic!("expected a batch");
        };
        assert_eq!(jobs.len(), 1);
        assert_eq!(pending, 0);
        assert!(matches!(batcher.inner.take_batch(), Drained::Idle));

        let _signal = batcher.shutdown();
        assert!(matches!(batcher.inner.take_batch(), Drained::Stop));
        assert_eq!(batcher.state(), BatcherState::Stopped);
    }

    #[test]
    fn dropping_an_unpolled_drain_loop_stops_the_batcher() {
        let (batcher, drain) = idle_batcher(1, 0);
        let first = batcher.submit(unit_job()).unwrap();
        let second = batcher.submit(unit_job()).unwrap();
        let signal = batcher.shutdown();
        assert!(signal.clone().now_or_never().is_none());

        drop(drain);

        assert_eq!(batcher.state(), BatcherState::Stopped);
        assert!(batcher.is_empty());
        assert_eq!(batcher.submit(unit_job()).unwrap_err(), SubmitError::ShuttingDown);
        assert!(signal.now_or_never().is_some());
        assert!(matches!(first.now_or_never(), Some(Err(JobError::Abandoned))));
        assert!(matches!(second.now_or_never(), Some(Err(JobError::Abandoned))));
    }

    #[test]
    fn dropping_the_drain_loop_rejects_submissions_without_a_shutdown() {
        let (batcher, drain) = idle_batcher(1, 0);
        drop(drain);

        assert!(batcher.is_shutdown());
        assert_eq!(batcher.submit(unit_job()).unwrap_err(), SubmitError::ShuttingDown);
        assert!(batcher.shutdown().now_or_never().is_some());
    }
}

//! Batch processors: how a drained batch gets executed.
//!
//! The contract is small. A processor receives each batch exactly once,
//! returns only after every job in it is terminal, and never fails as a
//! whole. Jobs enforce the rest themselves: [`Job::run`] tracks status and
//! captures errors and panics, so one bad job cannot take its siblings down.
use crate::job::Job;

mod variant {
    use crate::job::Job;

    /// Executes one drained batch.
    ///
    /// Implemented by [`ConcurrentProcessor`](super::ConcurrentProcessor),
    /// [`SequentialProcessor`](super::SequentialProcessor),
    /// [`SpawningProcessor`](super::SpawningProcessor) and closures
    /// `FnMut(Vec<Job<T>>) -> impl Future<Output = ()>`.
    #[trait_variant::make(BatchProcessor: Send)]
    pub trait LocalBatchProcessor<T> {
        /// Run every job of `batch` to a terminal state.
        async fn process(&mut self, batch: Vec<Job<T>>);
    }
}

pub use variant::{BatchProcessor, LocalBatchProcessor};

impl<T, F, Fut> BatchProcessor<T> for F
where
    F: FnMut(Vec<Job<T>>) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    fn process(&mut self, batch: Vec<Job<T>>) -> impl Future<Output = ()> + Send {
        self(batch)
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Run all jobs of a batch concurrently on the drain loop's task.
///
/// Jobs start in queue order; the batch settles when the slowest job does.
pub struct ConcurrentProcessor;

impl<T> BatchProcessor<T> for ConcurrentProcessor
where
    T: Send + 'static,
{
    async fn process(&mut self, batch: Vec<Job<T>>) {
        futures::future::join_all(batch.into_iter().map(Job::run)).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Run the jobs of a batch one after another, in queue order.
pub struct SequentialProcessor;

impl<T> BatchProcessor<T> for SequentialProcessor
where
    T: Send + 'static,
{
    async fn process(&mut self, batch: Vec<Job<T>>) {
        for job in batch {
            job.run().await;
        }
    }
}

/// How job futures are executed (inline, Tokio, etc.).
pub trait JobSpawner {
    type JobHandle<Fut>: Future<Output = ()> + Send + 'static
    where
        Fut: Future<Output = ()> + Send + 'static;
    fn spawn<Fut>(fut: Fut) -> Self::JobHandle<Fut>
    where
        Fut: Future<Output = ()> + Send + 'static;
}

#[derive(Debug, Clone, Copy, Default)]
/// Minimal spawner that runs jobs inline (deterministic tests, no runtime).
pub struct InlineSpawner;

impl JobSpawner for InlineSpawner {
    type JobHandle<Fut>
        = Fut
    where
        Fut: Future<Output = ()> + Send + 'static;
    fn spawn<Fut>(fut: Fut) -> Self::JobHandle<Fut>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        fut
    }
}

/// Hand every job of a batch to a [`JobSpawner`] and wait for all of them.
///
/// With [`TokioSpawner`](crate::TokioSpawner) jobs run in parallel on the
/// runtime's worker threads while the drain loop waits for the batch.
pub struct SpawningProcessor<Sp = InlineSpawner> {
    marker: std::marker::PhantomData<fn() -> Sp>,
}

impl<Sp> SpawningProcessor<Sp> {
    pub fn new() -> Self {
        Self {
            marker: std::marker::PhantomData,
        }
    }
}

impl<Sp> Default for SpawningProcessor<Sp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Sp> std::fmt::Debug for SpawningProcessor<Sp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawningProcessor")
            .field("spawner", &std::any::type_name::<Sp>())
            .finish()
    }
}

impl<T, Sp> BatchProcessor<T> for SpawningProcessor<Sp>
where
    T: Send + 'static,
    Sp: JobSpawner,
{
    async fn process(&mut self, batch: Vec<Job<T>>) {
        let handles = batch
            .into_iter()
            .map(|job| {
                <Sp as JobSpawner>::spawn(async move {
                    job.run().await;
                })
            })
            .collect::<Vec<_>>();
        futures::future::join_all(handles).await;
    }
}

//! Jobs: what callers submit, what processors run, what callers await.
//!
//! - [`SubmitJob`] is the caller's description of work: a callback and an
//!   optional display name.
//! - [`Job`] is a queued job. It is owned by the queue while pending and
//!   consumed by [`Job::run`], so a job can execute at most once by type.
//! - [`JobHandle`] stays with the caller. It resolves once the job is
//!   terminal and can be polled for the current status in the meantime.
use std::borrow::Cow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::{FutureExt as _, TryFutureExt as _};
use pin_project_lite::pin_project;

use crate::{JobStatus, error::JobError};

type Callback<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, JobError>> + Send>;

/// Work to enqueue into a [`Batcher`](crate::Batcher).
///
/// `T` is the value the callback produces on success.
pub struct SubmitJob<T> {
    name: Option<Cow<'static, str>>,
    callback: Callback<T>,
}

impl<T> SubmitJob<T>
where
    T: Send + 'static,
{
    /// Wrap an asynchronous callback.
    pub fn new<F, Fut, E>(callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>> + 'static,
    {
        Self {
            name: None,
            callback: Box::new(move || callback().map_err(JobError::failed).boxed()),
        }
    }

    /// Wrap a synchronous callback. It runs on the drain loop's task when
    /// its batch is processed.
    pub fn blocking<F, E>(callback: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>> + 'static,
    {
        Self {
            name: None,
            callback: Box::new(move || {
                futures::future::lazy(move |_| callback().map_err(JobError::failed)).boxed()
            }),
        }
    }
}

impl<T> SubmitJob<T> {
    /// Set the display name. Without one the batcher generates `job-<n>`.
    pub fn name<S>(self, name: S) -> Self
    where
        S: Into<Cow<'static, str>>,
    {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    pub(crate) fn take_name(&mut self) -> Option<Cow<'static, str>> {
        self.name.take()
    }

    /// Turn the description into a queued job and the caller's handle.
    pub(crate) fn enqueue(self, name: Cow<'static, str>) -> (Job<T>, JobHandle<T>) {
        let state = Arc::new(JobState {
            name,
            status: AtomicU8::new(JobStatus::Pending.as_u8()),
        });
        let (sender, receiver) = oneshot::channel();
        let job = Job {
            state: state.clone(),
            callback: self.callback,
            result: sender,
        };
        let handle = JobHandle { state, receiver };
        (job, handle)
    }
}

impl<T> std::fmt::Debug for SubmitJob<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitJob")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct JobState {
    name: Cow<'static, str>,
    status: AtomicU8,
}

impl JobState {
    fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: JobStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }
}

/// A queued job, handed to a [`BatchProcessor`](crate::BatchProcessor).
pub struct Job<T> {
    state: Arc<JobState>,
    callback: Callback<T>,
    result: oneshot::Sender<Result<T, JobError>>,
}

impl<T> Job<T> {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }
}

impl<T> Job<T>
where
    T: Send + 'static,
{
    /// Execute the callback and deliver its outcome to the handle.
    ///
    /// Errors and panics are captured into the job's own result; this
    /// future never fails and never unwinds.
    pub async fn run(self) -> JobStatus {
        let Job {
            state,
            callback,
            result,
        } = self;

        state.set_status(JobStatus::InProgress);
        tracing::trace!(job = %state.name, "Start job");
        let outcome = AssertUnwindSafe(async move { callback().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(JobError::from_panic(payload)));

        let status = match &outcome {
            Ok(_) => JobStatus::Complete,
            Err(error) => {
                tracing::debug!(job = %state.name, error = %error, "Job failed");
                JobStatus::Failed
            }
        };
        state.set_status(status);
        tracing::trace!(job = %state.name, status = %status, "Finish job");

        // The caller may have dropped the handle; the job still counts as done.
        let _ = result.send(outcome);
        status
    }
}

impl<T> std::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.state.name)
            .field("status", &self.state.status())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Caller side of a submitted job.
    ///
    /// Resolves to the callback's value or the captured [`JobError`].
    /// Resolves to [`JobError::Abandoned`] if the job is dropped unexecuted.
    pub struct JobHandle<T> {
        state: Arc<JobState>,
        #[pin]
        receiver: oneshot::Receiver<Result<T, JobError>>,
    }
}

impl<T> JobHandle<T> {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Current status, without waiting.
    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, JobError>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.project();
        match this.receiver.poll(cx) {
            std::task::Poll::Ready(Ok(outcome)) => std::task::Poll::Ready(outcome),
            std::task::Poll::Ready(Err(oneshot::Canceled)) => {
                std::task::Poll::Ready(Err(JobError::Abandoned))
            }
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.state.name)
            .field("status", &self.state.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn queued<T>(job: SubmitJob<T>) -> (Job<T>, JobHandle<T>) {
        job.enqueue("test-job".into())
    }

    #[test]
    fn successful_job_completes_and_resolves_handle() {
        let (job, handle) = queued(SubmitJob::new(|| async { Ok::<_, std::io::Error>(7_u32) }));
        assert_eq!(handle.status(), JobStatus::Pending);
        assert_eq!(job.name(), "test-job");

        assert_eq!(block_on(job.run()), JobStatus::Complete);
        assert!(handle.is_finished());
        assert_eq!(block_on(handle).ok(), Some(7));
    }

    #[test]
    fn callback_error_is_captured_as_failed() {
        let (job, handle) =
            queued(SubmitJob::<u32>::blocking(|| Err("downstream rejected the row")));

        assert_eq!(block_on(job.run()), JobStatus::Failed);
        assert_eq!(handle.status(), JobStatus::Failed);
        let error = block_on(handle).unwrap_err();
        assert_eq!(error.to_string(), "job failed: downstream rejected the row");
    }

    #[derive(Debug, thiserror::Error)]
    #[error("row {0} violates a unique constraint")]
    struct DuplicateRow(u64);

    #[test]
    fn async_callback_error_is_kept_as_the_source() {
        let (job, handle) =
            queued(SubmitJob::<u32>::new(|| async { Err(DuplicateRow(42)) }));

        assert_eq!(block_on(job.run()), JobStatus::Failed);
        let Err(JobError::Failed(source)) = block_on(handle) else {
            panic!("expected a failed job");
        };
        assert!(source.downcast_ref::<DuplicateRow>().is_some());
        assert_eq!(source.to_string(), "row 42 violates a unique constraint");
    }

    #[test]
    fn panicking_callback_is_captured_instead_of_unwinding() {
        let (job, handle) = queued(SubmitJob::<u32>::blocking(|| -> Result<u32, std::io::Error> {
            panic!("index out of range")
        }));

        assert_eq!(block_on(job.run()), JobStatus::Failed);
        assert!(matches!(
            block_on(handle),
            Err(JobError::Panicked(ref message)) if message == "index out of range"
        ));
    }

    #[test]
    fn status_is_in_progress_while_the_callback_runs() {
        let (seen_tx, seen_rx) = std::sync::mpsc::channel();
        let (job, handle) = queued(SubmitJob::new(|| async { Ok::<_, std::io::Error>(()) }));
        let handle = Arc::new(handle);
        let observer = handle.clone();
        // Swap in a callback that records the status it observes mid-run.
        let job = Job {
            callback: Box::new(move || {
                let _ = seen_tx.send(observer.status());
                async { Ok::<(), JobError>(()) }.boxed()
            }),
            ..job
        };

        block_on(job.run());
        assert_eq!(seen_rx.recv().ok(), Some(JobStatus::InProgress));
        assert_eq!(handle.status(), JobStatus::Complete);
    }

    #[test]
    fn dropped_job_abandons_its_handle() {
        let (job, handle) = queued(SubmitJob::new(|| async { Ok::<_, std::io::Error>(1_u8) }));
        drop(job);
        assert!(matches!(block_on(handle), Err(JobError::Abandoned)));
    }

    #[test]
    fn named_jobs_keep_their_name() {
        let mut job = SubmitJob::new(|| async { Ok::<_, std::io::Error>(()) }).name("sync-users");
        assert_eq!(job.take_name().as_deref(), Some("sync-users"));
        assert_eq!(job.take_name(), None);
    }
}

//! Run batch jobs as Tokio tasks.
//!
//! [`Job::run`](crate::Job::run) already captures panics from the callback,
//! so a join error means the task died some other way: the runtime shut
//! down, or code outside the callback panicked. It is logged and the batch
//! still settles.
use futures::FutureExt as _;
use futures::future::Map;
use tokio::task::{JoinError, JoinHandle};

use crate::processor::JobSpawner;

#[derive(Debug, Clone, Copy, Default)]
/// Spawn jobs onto the current Tokio runtime.
pub struct TokioSpawner;

/// Join handle that resolves to `()` whatever the task's fate.
pub type TokioJoinHandle = Map<JoinHandle<()>, fn(Result<(), JoinError>)>;

fn log_join_error(result: Result<(), JoinError>) {
    let Err(error) = result else {
        return;
    };
    if error.is_cancelled() {
        tracing::warn!("job task cancelled before it finished");
    } else {
        tracing::error!(error = %error, "job task panicked");
    }
}

impl JobSpawner for TokioSpawner {
    type JobHandle<Fut>
        = TokioJoinHandle
    where
        Fut: Future<Output = ()> + Send + 'static;

    fn spawn<Fut>(fut: Fut) -> Self::JobHandle<Fut>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(fut).map(log_join_error as fn(Result<(), JoinError>))
    }
}

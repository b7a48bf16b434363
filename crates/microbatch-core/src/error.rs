//! Errors surfaced by the batcher.
//!
//! Construction errors are fatal, submission errors leave the queue
//! untouched, job errors belong to a single job and never reach the drain
//! loop.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
/// Invalid batcher configuration.
pub enum BuildError {
    /// `frequency` is below one millisecond.
    #[error("frequency must be at least 1ms")]
    InvalidFrequency,
    /// `batch_size` is below one.
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
/// Why a job was not enqueued.
pub enum SubmitError {
    /// Shutdown was requested; the batcher no longer accepts work.
    #[error("batcher is shutting down")]
    ShuttingDown,
    /// The queue already holds `max_batches * batch_size` jobs.
    #[error("queue is full ({capacity} jobs)")]
    QueueFull { capacity: usize },
}

/// Failure captured from a single job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The callback returned an error.
    #[error("job failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    /// The callback panicked.
    #[error("job panicked: {0}")]
    Panicked(String),
    /// The job was dropped before it ran, e.g. the drain loop stopped early.
    #[error("job was dropped before it ran")]
    Abandoned,
}

impl JobError {
    pub(crate) fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        JobError::Failed(error.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send + 'static>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => "unrecognised panic payload".to_owned(),
            },
        };
        JobError::Panicked(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_keep_their_message() {
        let error = JobError::from_panic(Box::new("disk on fire"));
        assert!(matches!(error, JobError::Panicked(ref m) if m == "disk on fire"));

        let error = JobError::from_panic(Box::new(String::from("out of cheese")));
        assert!(matches!(error, JobError::Panicked(ref m) if m == "out of cheese"));
    }

    #[test]
    fn unknown_panic_payload_is_still_captured() {
        let error = JobError::from_panic(Box::new(42_u32));
        assert_eq!(error.to_string(), "job panicked: unrecognised panic payload");
    }

    #[test]
    fn failed_exposes_the_callback_error_as_source() {
        let error = JobError::failed(std::io::Error::other("connection reset"));
        assert_eq!(error.to_string(), "job failed: connection reset");
        let source = std::error::Error::source(&error).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("connection reset"));
    }

    #[test]
    fn queue_full_reports_capacity() {
        let error = SubmitError::QueueFull { capacity: 4 };
        assert_eq!(error.to_string(), "queue is full (4 jobs)");
    }
}

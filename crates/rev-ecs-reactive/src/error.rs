//! Worker lifecycle errors.

use thiserror::Error;

/// Error returned by [`ReactiveWorker`](crate::ReactiveWorker) operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// `start` was called on a worker that is already running.
    #[error("worker already started")]
    AlreadyStarted,

    /// The operation needs a running worker.
    #[error("worker not started")]
    NotStarted,

    /// The worker was stopped and accepts no more tasks.
    #[error("worker closed")]
    Closed,

    /// The OS refused to spawn the worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// One or more tasks panicked while the worker ran.
    #[error("{count} task(s) panicked on the worker thread")]
    TaskPanicked { count: usize },
}

//! Units of work executed by a worker.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Cooperative stop signal shared by a worker and the tasks it runs.
///
/// A worker never preempts a task. Long-running tasks should poll
/// [`CancellationToken::is_cancelled`] and return early once it is set.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Visible to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A unit of work run once on the worker thread.
///
/// Implemented for every `FnOnce(&CancellationToken)` closure.
pub trait Task: Send + 'static {
    /// Run the task to completion.
    fn execute(self: Box<Self>, token: &CancellationToken);
}

impl<F> Task for F
where
    F: FnOnce(&CancellationToken) + Send + 'static,
{
    fn execute(self: Box<Self>, token: &CancellationToken) {
        (*self)(token);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    struct Add {
        counter: Arc<AtomicU32>,
        amount: u32,
    }

    impl Task for Add {
        fn execute(self: Box<Self>, token: &CancellationToken) {
            if !token.is_cancelled() {
                self.counter.fetch_add(self.amount, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_token_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_struct_and_closure_tasks() {
        let counter = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let seen = Arc::clone(&counter);
        let tasks: Vec<Box<dyn Task>> = vec![
            Box::new(Add {
                counter: Arc::clone(&counter),
                amount: 2,
            }),
            Box::new(move |_: &CancellationToken| {
                seen.fetch_add(3, Ordering::SeqCst);
            }),
        ];

        for task in tasks {
            task.execute(&token);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_cancelled_task_skips_work() {
        let counter = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        token.cancel();

        let task: Box<dyn Task> = Box::new(Add {
            counter: Arc::clone(&counter),
            amount: 1,
        });
        task.execute(&token);

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}

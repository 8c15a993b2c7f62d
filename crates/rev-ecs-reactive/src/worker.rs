//! Background worker that runs tasks one at a time, in submission order.
//!
//! ```text
//!          start            pause
//!   Idle ─────────▶ Running ◀──────▶ Paused
//!    ▲                 │    resume     │
//!    │                 │ stop          │ stop
//!    │                 ▼               │
//!    └──── drained ── Stopped ◀────────┘
//! ```
//!
//! The queue is a `crossbeam-channel`. Stopping enqueues a poison message
//! behind every task already submitted, so queued work still runs (with
//! its [`CancellationToken`] set) before the thread exits.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rev_ecs::{Registry, Unsubscribe};
use tracing::{debug, error, info};

use crate::{
    error::WorkerError,
    system::ReactiveSystem,
    task::{CancellationToken, Task},
};

/// Lifecycle state of a [`ReactiveWorker`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started, or finished after a stop.
    Idle,
    /// Executing or waiting for tasks.
    Running,
    /// Will not start another task until resumed.
    Paused,
    /// Draining tasks queued before the stop.
    Stopped,
}

/// Worker thread settings.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Name of the spawned thread.
    pub name: String,
    /// Stack size of the spawned thread, or the platform default.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "reactive-worker".to_string(),
            stack_size: None,
        }
    }
}

impl WorkerConfig {
    /// Set the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the thread stack size in bytes.
    pub const fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

enum Message {
    Run(Box<dyn Task>),
    Stop,
}

struct Control {
    state: WorkerState,
    started: bool,
    closed: bool,
}

/// State shared between the worker handle, its thread and task senders.
struct Shared {
    name: String,
    control: Mutex<Control>,
    resumed: Condvar,
    token: CancellationToken,
    panics: AtomicUsize,
    sender: Sender<Message>,
}

impl Shared {
    fn submit(&self, task: Box<dyn Task>) -> Result<(), WorkerError> {
        // Hold the lock so a task can never be queued behind the stop message.
        let control = self.control.lock();
        if control.closed {
            return Err(WorkerError::Closed);
        }
        self.sender
            .send(Message::Run(task))
            .map_err(|_| WorkerError::Closed)?;
        drop(control);
        Ok(())
    }

    fn wait_while_paused(&self) {
        let mut control = self.control.lock();
        while control.state == WorkerState::Paused {
            self.resumed.wait(&mut control);
        }
    }

    fn run(&self, receiver: &Receiver<Message>) {
        let _idle = IdleOnExit(self);
        debug!(worker = %self.name, "worker loop started");

        while let Ok(Message::Run(task)) = receiver.recv() {
            self.wait_while_paused();

            let result = panic::catch_unwind(AssertUnwindSafe(|| task.execute(&self.token)));
            if result.is_err() {
                self.panics.fetch_add(1, Ordering::Relaxed);
                error!(worker = %self.name, "task panicked");
            }
        }
    }
}

/// Returns the worker to `Idle` however the loop exits.
struct IdleOnExit<'a>(&'a Shared);

impl Drop for IdleOnExit<'_> {
    fn drop(&mut self) {
        self.0.control.lock().state = WorkerState::Idle;
        debug!(worker = %self.0.name, "worker loop exited");
    }
}

/// Cloneable handle for submitting tasks to a worker from other threads.
///
/// Subscription callbacks hold one of these to hand work off the
/// notifying thread.
#[derive(Clone)]
pub struct TaskSender {
    shared: Arc<Shared>,
}

impl TaskSender {
    /// Queue a task. Fails once the worker is stopped.
    pub fn send<T: Task>(&self, task: T) -> Result<(), WorkerError> {
        self.shared.submit(Box::new(task))
    }

    /// Queue an already boxed task.
    pub fn send_boxed(&self, task: Box<dyn Task>) -> Result<(), WorkerError> {
        self.shared.submit(task)
    }
}

impl fmt::Debug for TaskSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSender")
            .field("worker", &self.shared.name)
            .finish()
    }
}

/// A dedicated thread that executes queued tasks sequentially.
///
/// Tasks may be queued before `start`; they run once the thread is up.
/// A worker runs at most once: after `stop` it rejects new tasks and
/// cannot be restarted.
pub struct ReactiveWorker {
    config: WorkerConfig,
    shared: Arc<Shared>,
    receiver: Receiver<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Unsubscribe>>,
}

impl Default for ReactiveWorker {
    fn default() -> Self {
        Self::with_config(WorkerConfig::default())
    }
}

impl ReactiveWorker {
    /// Create an idle worker whose thread will be called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(WorkerConfig::default().name(name))
    }

    /// Create an idle worker with explicit thread settings.
    #[must_use]
    pub fn with_config(config: WorkerConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            control: Mutex::new(Control {
                state: WorkerState::Idle,
                started: false,
                closed: false,
            }),
            resumed: Condvar::new(),
            token: CancellationToken::new(),
            panics: AtomicUsize::new(0),
            sender,
        });

        Self {
            config,
            shared,
            receiver,
            thread: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.shared.control.lock().state
    }

    /// The thread settings this worker was created with.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Token set when the worker is stopped.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    /// Handle for queueing tasks from other threads.
    #[must_use]
    pub fn sender(&self) -> TaskSender {
        TaskSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawn the worker thread.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut control = self.shared.control.lock();
        if control.closed {
            return Err(WorkerError::Closed);
        }
        if control.started {
            return Err(WorkerError::AlreadyStarted);
        }

        let mut builder = thread::Builder::new().name(self.config.name.clone());
        if let Some(size) = self.config.stack_size {
            builder = builder.stack_size(size);
        }

        let shared = Arc::clone(&self.shared);
        let receiver = self.receiver.clone();
        let handle = builder.spawn(move || shared.run(&receiver))?;

        control.started = true;
        control.state = WorkerState::Running;
        drop(control);

        *self.thread.lock() = Some(handle);
        info!(worker = %self.config.name, "worker started");
        Ok(())
    }

    /// Stop starting new tasks until [`ReactiveWorker::resume`].
    ///
    /// A task already executing runs to completion.
    pub fn pause(&self) -> Result<(), WorkerError> {
        let mut control = self.shared.control.lock();
        match control.state {
            WorkerState::Running => {
                control.state = WorkerState::Paused;
                debug!(worker = %self.config.name, "worker paused");
                Ok(())
            }
            WorkerState::Paused => Ok(()),
            WorkerState::Stopped => Err(WorkerError::Closed),
            WorkerState::Idle if control.closed => Err(WorkerError::Closed),
            WorkerState::Idle => Err(WorkerError::NotStarted),
        }
    }

    /// Continue after [`ReactiveWorker::pause`].
    pub fn resume(&self) -> Result<(), WorkerError> {
        let mut control = self.shared.control.lock();
        match control.state {
            WorkerState::Paused => {
                control.state = WorkerState::Running;
                self.shared.resumed.notify_all();
                debug!(worker = %self.config.name, "worker resumed");
                Ok(())
            }
            WorkerState::Running => Ok(()),
            WorkerState::Stopped => Err(WorkerError::Closed),
            WorkerState::Idle if control.closed => Err(WorkerError::Closed),
            WorkerState::Idle => Err(WorkerError::NotStarted),
        }
    }

    /// Stop the worker.
    ///
    /// Tasks queued before this call still run, with the cancellation
    /// token set. Later submissions fail with [`WorkerError::Closed`].
    /// Subscriptions made through [`ReactiveWorker::install`] are
    /// detached, even when the worker was never started. Idempotent.
    pub fn stop(&self) -> Result<(), WorkerError> {
        let mut control = self.shared.control.lock();
        if control.closed {
            return Ok(());
        }
        if !control.started {
            drop(control);
            self.detach_systems();
            return Err(WorkerError::NotStarted);
        }

        control.closed = true;
        control.state = WorkerState::Stopped;
        self.shared.token.cancel();
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.shared.sender.send(Message::Stop);
        self.shared.resumed.notify_all();
        drop(control);

        let detached = self.detach_systems();
        info!(
            worker = %self.config.name,
            subscriptions = detached,
            "worker stopping"
        );
        Ok(())
    }

    fn detach_systems(&self) -> usize {
        let detached: Vec<_> = self.subscriptions.lock().drain(..).collect();
        for subscription in &detached {
            subscription.unsubscribe();
        }
        detached.len()
    }

    /// Wait for the worker thread to exit.
    ///
    /// Blocks until some thread calls [`ReactiveWorker::stop`]. Reports
    /// tasks that panicked while the worker ran.
    pub fn join(&self) -> Result<(), WorkerError> {
        let Some(handle) = self.thread.lock().take() else {
            return if self.shared.control.lock().started {
                Ok(())
            } else {
                Err(WorkerError::NotStarted)
            };
        };

        let thread_panicked = handle.join().is_err();
        let count = self.shared.panics.load(Ordering::Relaxed);

        if thread_panicked || count > 0 {
            return Err(WorkerError::TaskPanicked {
                count: count.max(1),
            });
        }
        Ok(())
    }

    /// Queue a task.
    pub fn add_task<T: Task>(&self, task: T) -> Result<(), WorkerError> {
        self.shared.submit(Box::new(task))
    }

    /// Let `system` subscribe to `registry`, feeding tasks to this worker.
    ///
    /// The subscriptions it returns are detached when the worker stops.
    pub fn install<S>(&self, system: &S, registry: &Arc<Registry>) -> Result<(), WorkerError>
    where
        S: ReactiveSystem + ?Sized,
    {
        if self.shared.control.lock().closed {
            return Err(WorkerError::Closed);
        }

        let subscriptions = system.initialize(registry, &self.sender());
        debug!(
            worker = %self.config.name,
            subscriptions = subscriptions.len(),
            "installed reactive system"
        );
        self.subscriptions.lock().extend(subscriptions);
        Ok(())
    }
}

impl Drop for ReactiveWorker {
    fn drop(&mut self) {
        if !self.shared.control.lock().started {
            let detached = self.detach_systems();
            if detached > 0 {
                debug!(worker = %self.config.name, subscriptions = detached, "dropped unstarted worker");
            }
            return;
        }

        let _ = self.stop();
        if let Err(e) = self.join() {
            error!(worker = %self.config.name, error = %e, "worker shut down with errors");
        }
    }
}

impl fmt::Debug for ReactiveWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveWorker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("queued", &self.receiver.len())
            .finish()
    }
}

#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::redundant_pub_crate)]

//! REV ECS Reactive
//!
//! Background workers for reacting to [`rev_ecs`] notifications off the
//! notifying thread.
//!
//! # Core Concept: Hand Off, Then Re-enter
//!
//! Registry subscribers run synchronously inside `insert`/`update`/`remove`.
//! A reactive pipeline keeps them cheap by queueing a task on a
//! [`ReactiveWorker`]; the worker runs tasks one at a time, in order, and
//! each task may read and write the registry again from the worker thread.
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(Registry::new());
//! let worker = ReactiveWorker::new("damage");
//! worker.install(&ApplyDamage, &registry)?;
//! worker.start()?;
//!
//! // ... mutate the registry; ApplyDamage queues tasks on `worker` ...
//!
//! worker.stop()?;
//! worker.join()?;
//! ```

mod error;
mod system;
mod task;
mod worker;

pub use error::WorkerError;
pub use system::ReactiveSystem;
pub use task::{CancellationToken, Task};
pub use worker::{ReactiveWorker, TaskSender, WorkerConfig, WorkerState};

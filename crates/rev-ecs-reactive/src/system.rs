//! Reactive systems: listeners that turn notifications into worker tasks.

use std::sync::Arc;

use rev_ecs::{Registry, Unsubscribe};

use crate::worker::TaskSender;

/// Subscribes to a [`Registry`] and forwards work to a worker.
///
/// Callbacks run synchronously on whichever thread mutated the registry.
/// Keep them short: queue a task on `tasks` and let the worker do the
/// heavy lifting, re-entering the registry from its own thread.
///
/// ```ignore
/// struct GrantStarterGold;
///
/// impl ReactiveSystem for GrantStarterGold {
///     fn initialize(&self, registry: &Arc<Registry>, tasks: &TaskSender) -> Vec<Unsubscribe> {
///         let registry_for_task = Arc::clone(registry);
///         let tasks = tasks.clone();
///         vec![registry.subscribe_when::<Player, _, _>(
///             move |n| {
///                 let registry = Arc::clone(&registry_for_task);
///                 let _ = tasks.send(move |_: &CancellationToken| {
///                     registry.insert(n.entity, Gold(100));
///                 });
///             },
///             |n| n.operation == Operation::Inserted,
///         )]
///     }
/// }
/// ```
pub trait ReactiveSystem {
    /// Subscribe to `registry`. The returned handles are detached when the
    /// worker that installed this system stops.
    fn initialize(&self, registry: &Arc<Registry>, tasks: &TaskSender) -> Vec<Unsubscribe>;
}

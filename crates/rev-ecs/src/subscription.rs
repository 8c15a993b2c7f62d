//! Subscriptions: typed callbacks attached to one component tag.
//!
//! The registry keeps callbacks type-erased and grouped by tag. Dispatch
//! copies the list for a tag under the lock and invokes it after the lock
//! is released, so a callback may subscribe or unsubscribe without
//! deadlocking.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use hashbrown::HashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::{
    component::{AnyComponent, Component, Tag},
    entity::EntityId,
    notification::{Notification, Operation},
};

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Type-erased subscriber. Receives the published value, if any.
pub(crate) type ErasedCallback = dyn Fn(Operation, EntityId, Option<&AnyComponent>) + Send + Sync;

/// Wrap a typed callback and precondition into an erased subscriber.
pub(crate) fn erase<T, F, P>(callback: F, precondition: P) -> Arc<ErasedCallback>
where
    T: Component,
    F: Fn(Notification<T>) + Send + Sync + 'static,
    P: Fn(&Notification<T>) -> bool + Send + Sync + 'static,
{
    Arc::new(
        move |operation: Operation, entity: EntityId, component: Option<&AnyComponent>| {
            let component = match component {
                Some(any) => match any.downcast::<T>() {
                    Some(typed) => Some(typed),
                    // Tag collision between registries that do not share types.
                    None => return,
                },
                None => None,
            };

            let notification = Notification::new(operation, entity, component);
            if precondition(&notification) {
                callback(notification);
            }
        },
    )
}

#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: u64,
    by_tag: HashMap<Tag, Vec<(SubscriptionId, Arc<ErasedCallback>)>, FxBuildHasher>,
}

impl Subscriptions {
    pub(crate) fn add(&mut self, tag: Tag, callback: Arc<ErasedCallback>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.by_tag.entry(tag).or_default().push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, tag: Tag, id: SubscriptionId) -> bool {
        let Some(list) = self.by_tag.get_mut(&tag) else {
            return false;
        };

        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;

        if list.is_empty() {
            self.by_tag.remove(&tag);
        }
        removed
    }

    /// Copy of the subscribers for `tag`.
    pub(crate) fn snapshot(&self, tag: Tag) -> SmallVec<[Arc<ErasedCallback>; 4]> {
        self.by_tag
            .get(&tag)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_tag.values().map(Vec::len).sum()
    }
}

/// Handle returned by `subscribe`; detaches the subscription when invoked.
///
/// Dropping the handle leaves the subscription in place. Calling
/// [`Unsubscribe::unsubscribe`] more than once, or after the registry is
/// gone, does nothing.
#[derive(Clone)]
pub struct Unsubscribe {
    id: SubscriptionId,
    tag: Tag,
    subscriptions: Weak<Mutex<Subscriptions>>,
}

impl Unsubscribe {
    pub(crate) fn new(id: SubscriptionId, tag: Tag, subscriptions: &Arc<Mutex<Subscriptions>>) -> Self {
        Self {
            id,
            tag,
            subscriptions: Arc::downgrade(subscriptions),
        }
    }

    /// Id of the subscription this handle controls.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Tag the subscription listens on.
    #[must_use]
    pub const fn tag(&self) -> Tag {
        self.tag
    }

    /// Detach the subscription. Returns `true` only on the call that removed it.
    pub fn unsubscribe(&self) -> bool {
        let Some(subscriptions) = self.subscriptions.upgrade() else {
            return false;
        };

        let removed = subscriptions.lock().remove(self.tag, self.id);
        if removed {
            tracing::debug!(id = self.id.0, tag = ?self.tag, "unsubscribed");
        }
        removed
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

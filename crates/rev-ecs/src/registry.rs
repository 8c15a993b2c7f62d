//! Registry - the thread-safe index from entity id to entity.
//!
//! The registry owns entity lifecycle, routes mutations to the target
//! entity and publishes a [`Notification`] to matching subscribers after
//! every successful change.
//!
//! # Locking
//!
//! Three independent locks are involved and never nested:
//!
//! - the entity map lock, held only to look up or copy the map
//! - the subscription lock, held only to add, remove or copy subscribers
//! - one lock per entity, held for the duration of a single entity operation
//!
//! Subscribers run synchronously on the mutating thread after every lock
//! has been released. A subscriber that blocks stalls the call that
//! triggered it.
//!
//! # Updates
//!
//! ```ignore
//! let registry = Registry::new();
//! let player = registry.create_entity();
//! registry.insert(player, Health { current: 20 });
//!
//! let read = registry.select::<Health>(player).unwrap();
//! let mut staged = read.stage();
//! staged.current -= 5;
//!
//! // Fails if another writer published a newer revision since `read`.
//! if !registry.update(player, staged) {
//!     // re-read and retry
//! }
//! ```

use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};

use crate::{
    component::{AnyComponent, Component, ComponentRef, Staged, Tag, TypeRegistry},
    entity::{Entity, EntityId, EntityState},
    notification::{Notification, Operation},
    signature::Signature,
    subscription::{self, Subscriptions, Unsubscribe},
    view::{ComponentSet, View},
};

#[derive(Default)]
struct EntityMap {
    entities: BTreeMap<EntityId, Arc<Entity>>,
    next_id: EntityId,
}

/// The component store.
///
/// Every method takes `&self`; share it between threads with an `Arc`.
pub struct Registry {
    types: Arc<TypeRegistry>,
    entities: RwLock<EntityMap>,
    subscriptions: Arc<Mutex<Subscriptions>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry with its own type registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_types(Arc::new(TypeRegistry::new()))
    }

    /// Create an empty registry that shares tags with other registries.
    #[must_use]
    pub fn with_types(types: Arc<TypeRegistry>) -> Self {
        Self {
            types,
            entities: RwLock::new(EntityMap::default()),
            subscriptions: Arc::new(Mutex::new(Subscriptions::default())),
        }
    }

    /// The type registry tags are drawn from.
    #[must_use]
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    // ========================================================================
    // Entity lifecycle
    // ========================================================================

    /// Allocate a new, empty entity and return its id.
    pub fn create_entity(&self) -> EntityId {
        let mut map = self.entities.write();
        let id = map.next_id;
        map.next_id += 1;
        map.entities.insert(id, Arc::new(Entity::new(id)));
        drop(map);

        tracing::debug!(entity = id, "created entity");
        id
    }

    /// Destroy an entity.
    ///
    /// Every component it held produces one `Removed` notification, sent
    /// after the entity is gone from the map. A writer that looked the
    /// entity up before it was erased either lands before the retirement,
    /// and is reported here, or is rejected.
    pub fn remove_entity(&self, id: EntityId) -> bool {
        let Some(entity) = self.entities.write().entities.remove(&id) else {
            return false;
        };

        let signature = entity.retire();
        tracing::debug!(entity = id, components = signature.enabled_count(), "removed entity");

        for idx in signature.iter_ones() {
            self.dispatch(Tag::from_raw(idx as u32), Operation::Removed, id, None);
        }
        true
    }

    /// Check if the entity exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.read().entities.contains_key(&id)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.read().entities.len()
    }

    /// Ids of all live entities, ascending.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.read().entities.keys().copied().collect()
    }

    /// Copy of the entity's signature.
    #[must_use]
    pub fn signature(&self, id: EntityId) -> Option<Signature> {
        Some(self.entity(id)?.signature())
    }

    fn entity(&self, id: EntityId) -> Option<Arc<Entity>> {
        self.entities.read().entities.get(&id).cloned()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Attach `component` to the entity.
    ///
    /// Fails if the entity does not exist or already holds a `T`.
    pub fn insert<T: Component>(&self, id: EntityId, component: T) -> bool {
        let tag = self.types.register::<T>();
        let Some(entity) = self.entity(id) else {
            return false;
        };

        let component = AnyComponent::new(component);
        if !entity.insert(tag, component.clone()) {
            return false;
        }

        self.dispatch(tag, Operation::Inserted, id, Some(&component));
        true
    }

    /// Publish a staged copy of a component.
    ///
    /// Succeeds only if the stored `T` is still at the revision `staged`
    /// was read from. On rejection nothing changes; re-read and retry.
    pub fn update<T: Component>(&self, id: EntityId, staged: Staged<T>) -> bool {
        let Some(tag) = self.types.get::<T>() else {
            return false;
        };
        let Some(entity) = self.entity(id) else {
            return false;
        };

        let (value, revision) = staged.into_parts();
        let Some(published) = entity.update(tag, value, revision) else {
            return false;
        };

        self.dispatch(tag, Operation::Updated, id, Some(&published));
        true
    }

    /// Apply `f` to the current `T` and publish it, retrying on conflict.
    ///
    /// Returns `false` once the component (or entity) no longer exists.
    /// `f` may run more than once.
    pub fn modify<T, F>(&self, id: EntityId, mut f: F) -> bool
    where
        T: Component,
        F: FnMut(&mut T),
    {
        loop {
            let Some(current) = self.select::<T>(id) else {
                return false;
            };

            let mut staged = current.stage();
            f(&mut staged);

            if self.update(id, staged) {
                return true;
            }
            tracing::trace!(entity = id, revision = current.revision(), "modify lost a race, retrying");
        }
    }

    /// Detach the `T` component from the entity.
    pub fn remove<T: Component>(&self, id: EntityId) -> bool {
        match self.types.get::<T>() {
            Some(tag) => self.remove_tag(id, tag),
            None => false,
        }
    }

    /// Detach the component stored under `tag`.
    pub fn remove_tag(&self, id: EntityId, tag: Tag) -> bool {
        let Some(entity) = self.entity(id) else {
            return false;
        };

        if entity.remove(tag).is_none() {
            return false;
        }

        self.dispatch(tag, Operation::Removed, id, None);
        true
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The `T` component of one entity.
    #[must_use]
    pub fn select<T: Component>(&self, id: EntityId) -> Option<ComponentRef<T>> {
        let tag = self.types.get::<T>()?;
        self.entity(id)?.get_one(tag)?.downcast()
    }

    /// Snapshot the columns `Q` for every entity that holds all of them.
    ///
    /// Rows are ordered by entity id. The entity map is copied under its
    /// lock; each entity is then read on its own, so the view is not a
    /// single point-in-time snapshot across entities.
    #[must_use]
    pub fn query<Q: ComponentSet>(&self) -> View<Q> {
        let tags = Q::tags(&self.types);
        let filter = Signature::from_indices(tags.iter().map(|tag| tag.index()));

        let candidates: Vec<Arc<Entity>> = self.entities.read().entities.values().cloned().collect();

        let mut ids = Vec::new();
        let mut components = Vec::with_capacity(candidates.len() * Q::WIDTH);

        for entity in &candidates {
            if !entity.has_all(&filter) {
                continue;
            }
            // Skipped if a component vanished since the signature check.
            if let Some(row) = entity.get_ordered(&tags) {
                ids.push(entity.id());
                components.extend(row);
            }
        }

        View::assemble(ids, components)
    }

    /// Lock one component for in-place mutation, bypassing revision checks.
    ///
    /// **Advanced.** The returned guard holds the entity lock until it is
    /// released; every other operation on that entity blocks meanwhile.
    /// Hand the guard to [`Registry::finish_unsafe_update`] to publish the
    /// change and notify subscribers. Dropping it instead still publishes
    /// a mutated value with a new revision, which invalidates copies
    /// staged from the old one, but sends no notification.
    #[must_use = "hand the guard to `finish_unsafe_update` to notify subscribers"]
    pub fn select_unsafely<T: Component>(&self, id: EntityId) -> Option<UncheckedMut<T>> {
        let tag = self.types.get::<T>()?;
        let guard = self.entity(id)?.lock_owned();
        if guard.is_retired() {
            return None;
        }
        let value = guard.component(tag)?.downcast::<T>()?.into_arc();

        Some(UncheckedMut {
            guard,
            entity: id,
            tag,
            value,
            dirty: false,
        })
    }

    /// Publish the change made through an [`UncheckedMut`], release the
    /// entity lock, then send `Updated` to `T` subscribers.
    ///
    /// Subscribers are notified even if the guard was only read through.
    pub fn finish_unsafe_update<T: Component>(&self, guard: UncheckedMut<T>) -> bool {
        let (id, tag, current) = guard.release();
        let Some(current) = current else {
            return false;
        };

        self.dispatch(tag, Operation::Updated, id, Some(&current));
        true
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Call `callback` for every insert, update and removal of a `T`.
    pub fn subscribe<T, F>(&self, callback: F) -> Unsubscribe
    where
        T: Component,
        F: Fn(Notification<T>) + Send + Sync + 'static,
    {
        self.subscribe_when(callback, |_: &Notification<T>| true)
    }

    /// Like [`Registry::subscribe`], but only when `precondition` holds.
    pub fn subscribe_when<T, F, P>(&self, callback: F, precondition: P) -> Unsubscribe
    where
        T: Component,
        F: Fn(Notification<T>) + Send + Sync + 'static,
        P: Fn(&Notification<T>) -> bool + Send + Sync + 'static,
    {
        let tag = self.types.register::<T>();
        let erased = subscription::erase::<T, _, _>(callback, precondition);
        let id = self.subscriptions.lock().add(tag, erased);

        tracing::debug!(id = id.raw(), ?tag, component = std::any::type_name::<T>(), "subscribed");
        Unsubscribe::new(id, tag, &self.subscriptions)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    fn dispatch(
        &self,
        tag: Tag,
        operation: Operation,
        entity: EntityId,
        component: Option<&AnyComponent>,
    ) {
        let subscribers = self.subscriptions.lock().snapshot(tag);
        if subscribers.is_empty() {
            return;
        }

        tracing::trace!(entity, ?tag, %operation, count = subscribers.len(), "dispatching");
        for subscriber in &subscribers {
            subscriber(operation, entity, component);
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &self.entity_count())
            .field("subscriptions", &self.subscription_count())
            .field("types", &self.types)
            .finish()
    }
}

/// Exclusive, revision-free access to one stored component.
///
/// Returned by [`Registry::select_unsafely`]. Holds the entity lock.
pub struct UncheckedMut<T: Component> {
    guard: ArcMutexGuard<RawMutex, EntityState>,
    entity: EntityId,
    tag: Tag,
    value: Arc<T>,
    dirty: bool,
}

impl<T: Component> UncheckedMut<T> {
    /// Id of the entity this guard locks.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    /// Publish if dirty, then unlock. Returns the stored component.
    fn release(mut self) -> (EntityId, Tag, Option<AnyComponent>) {
        let published = if self.dirty {
            self.dirty = false;
            let value: Arc<dyn Any + Send + Sync> = self.value.clone();
            self.guard.publish(self.tag, value)
        } else {
            None
        };
        let current = published.or_else(|| self.guard.component(self.tag).cloned());
        (self.entity, self.tag, current)
    }
}

impl<T: Component> Deref for UncheckedMut<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Component> DerefMut for UncheckedMut<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.dirty = true;
        // Readers holding the published value keep their copy.
        Arc::make_mut(&mut self.value)
    }
}

impl<T: Component> Drop for UncheckedMut<T> {
    fn drop(&mut self) {
        if self.dirty {
            let value: Arc<dyn Any + Send + Sync> = self.value.clone();
            self.guard.publish(self.tag, value);
        }
    }
}

impl<T: Component + fmt::Debug> fmt::Debug for UncheckedMut<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UncheckedMut")
            .field("entity", &self.entity)
            .field("value", &*self.value)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

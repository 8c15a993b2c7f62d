//! Entities: a signature plus a tag-indexed table of component slots.
//!
//! Every entity carries its own lock, so work on different entities never
//! contends. The signature and slot table always have the same length and
//! grow together the first time a larger tag is inserted.

use std::{any::Any, fmt, sync::Arc};

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use smallvec::SmallVec;

use crate::{
    component::{AnyComponent, Revision, Tag},
    signature::Signature,
};

/// Entity identifier. Assigned in increasing order and never reused.
pub type EntityId = u64;

/// State guarded by the entity lock.
pub(crate) struct EntityState {
    signature: Signature,
    slots: Vec<Option<AnyComponent>>,
    retired: bool,
}

impl EntityState {
    fn new() -> Self {
        Self {
            signature: Signature::new(0),
            slots: Vec::new(),
            retired: false,
        }
    }

    fn slot(&self, tag: Tag) -> Option<&AnyComponent> {
        self.slots.get(tag.index()).and_then(Option::as_ref)
    }

    /// Replace the value at an occupied slot, bumping its revision.
    pub(crate) fn publish(
        &mut self,
        tag: Tag,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Option<AnyComponent> {
        let slot = self.slots.get_mut(tag.index())?.as_mut()?;
        *slot = AnyComponent::from_parts(value, slot.revision() + 1);
        Some(slot.clone())
    }

    pub(crate) fn component(&self, tag: Tag) -> Option<&AnyComponent> {
        self.slot(tag)
    }

    pub(crate) const fn is_retired(&self) -> bool {
        self.retired
    }
}

/// A single entity.
pub struct Entity {
    id: EntityId,
    state: Arc<Mutex<EntityState>>,
}

impl Entity {
    /// Create an entity with no components.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(EntityState::new())),
        }
    }

    /// Get the entity's id.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Store `component` under `tag`.
    ///
    /// Fails without side effects if the tag is already occupied. The
    /// stored revision always starts at 0.
    pub fn insert(&self, tag: Tag, component: AnyComponent) -> bool {
        let mut state = self.state.lock();
        let idx = tag.index();

        if state.retired {
            tracing::trace!(entity = self.id, ?tag, "insert rejected: entity removed");
            return false;
        }

        if state.signature.contains(idx) {
            tracing::trace!(entity = self.id, ?tag, "insert rejected: tag occupied");
            return false;
        }

        if state.slots.len() <= idx {
            state.slots.resize(idx + 1, None);
            state.signature.grow_to(idx + 1);
        }

        state.slots[idx] = Some(AnyComponent::from_parts(component.value_arc(), 0));
        state.signature.set_unchecked(idx, true);
        true
    }

    /// Clear the slot under `tag`, returning what was stored there.
    pub fn remove(&self, tag: Tag) -> Option<AnyComponent> {
        let mut state = self.state.lock();
        let idx = tag.index();

        if state.retired || !state.signature.contains(idx) {
            tracing::trace!(entity = self.id, ?tag, "remove rejected: tag absent");
            return None;
        }

        let removed = state.slots[idx].take();
        state.signature.set_unchecked(idx, false);
        removed
    }

    /// Replace the component under `tag` if it is still at `revision`.
    ///
    /// Compare-then-swap under the entity lock: of several writers that
    /// read the same revision, only the first to arrive succeeds. On
    /// success the stored revision is incremented and the newly published
    /// component is returned.
    #[must_use = "a `None` means the update was rejected"]
    pub fn update(
        &self,
        tag: Tag,
        value: Arc<dyn Any + Send + Sync>,
        revision: Revision,
    ) -> Option<AnyComponent> {
        let mut state = self.state.lock();

        if state.retired {
            tracing::trace!(entity = self.id, ?tag, "update rejected: entity removed");
            return None;
        }

        let Some(current) = state.slot(tag) else {
            tracing::trace!(entity = self.id, ?tag, "update rejected: tag absent");
            return None;
        };

        if current.value_type_id() != (*value).type_id() {
            tracing::trace!(entity = self.id, ?tag, "update rejected: type mismatch");
            return None;
        }

        if current.revision() != revision {
            tracing::trace!(
                entity = self.id,
                ?tag,
                stored = current.revision(),
                submitted = revision,
                "update rejected: stale revision"
            );
            return None;
        }

        state.publish(tag, value)
    }

    /// Check if a component is stored under `tag`.
    #[must_use]
    pub fn has(&self, tag: Tag) -> bool {
        self.state.lock().signature.contains(tag.index())
    }

    /// Check if every tag set in `signature` is present.
    #[must_use]
    pub fn has_all(&self, signature: &Signature) -> bool {
        self.state.lock().signature.has(signature)
    }

    /// Copy of the entity's signature.
    #[must_use]
    pub fn signature(&self) -> Signature {
        self.state.lock().signature.clone()
    }

    /// Mark the entity as removed and return its final signature.
    ///
    /// Every later insert, update or remove is rejected, so the returned
    /// signature lists exactly the components that were ever observable.
    pub(crate) fn retire(&self) -> Signature {
        let mut state = self.state.lock();
        state.retired = true;
        state.signature.clone()
    }

    /// Components whose tag is set both here and in `query`, ascending by tag.
    ///
    /// The slot table is copied under the lock and filtered afterwards, so
    /// the result is a snapshot that may already be stale when returned.
    #[must_use]
    pub fn get(&self, query: &Signature) -> Vec<AnyComponent> {
        let (signature, slots) = {
            let state = self.state.lock();
            (state.signature.clone(), state.slots.clone())
        };

        query
            .iter_ones()
            .filter(|&idx| signature.contains(idx))
            .filter_map(|idx| slots.get(idx).cloned().flatten())
            .collect()
    }

    /// The component stored under `tag`.
    #[must_use]
    pub fn get_one(&self, tag: Tag) -> Option<AnyComponent> {
        self.state.lock().slot(tag).cloned()
    }

    /// Components for `tags`, in the order given, read under one lock.
    ///
    /// Returns `None` unless every tag is present.
    #[must_use]
    pub fn get_ordered(&self, tags: &[Tag]) -> Option<SmallVec<[AnyComponent; 4]>> {
        let state = self.state.lock();
        tags.iter().map(|&tag| state.slot(tag).cloned()).collect()
    }

    /// Lock the entity with a guard that owns its reference to the state.
    pub(crate) fn lock_owned(&self) -> ArcMutexGuard<RawMutex, EntityState> {
        self.state.lock_arc()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("signature", &self.signature())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRef;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct IntComponent {
        number: i32,
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct StringComponent {
        name: String,
    }

    const INT: Tag = Tag::from_raw(2);
    const STRING: Tag = Tag::from_raw(1);

    fn read_int(entity: &Entity) -> ComponentRef<IntComponent> {
        entity.get_one(INT).unwrap().downcast().unwrap()
    }

    fn submit(entity: &Entity, staged: crate::Staged<IntComponent>) -> bool {
        let (value, revision) = staged.into_parts();
        entity.update(INT, value, revision).is_some()
    }

    #[test]
    fn test_has_after_insert() {
        let entity = Entity::new(0);
        assert!(!entity.has(INT));

        assert!(entity.insert(INT, AnyComponent::new(IntComponent::default())));
        assert!(entity.has(INT));
        assert!(!entity.has(STRING));
        assert!(!entity.has(Tag::from_raw(40)));
    }

    #[test]
    fn test_second_insert_rejected() {
        let entity = Entity::new(0);
        assert!(entity.insert(INT, AnyComponent::new(IntComponent { number: 1 })));
        assert!(!entity.insert(INT, AnyComponent::new(IntComponent { number: 2 })));

        assert_eq!(read_int(&entity).number, 1);
    }

    #[test]
    fn test_get_by_signature() {
        let entity = Entity::new(0);
        entity.insert(INT, AnyComponent::new(IntComponent::default()));

        let mut query = Signature::new(3);
        query.set(INT.index(), true).unwrap();

        assert_eq!(entity.get(&query).len(), 1);
        assert_eq!(entity.get(&query).len(), 1);
    }

    #[test]
    fn test_get_returns_ascending_tags() {
        let entity = Entity::new(0);
        entity.insert(INT, AnyComponent::new(IntComponent { number: 3 }));
        entity.insert(
            STRING,
            AnyComponent::new(StringComponent {
                name: "a".to_string(),
            }),
        );

        let query = Signature::from_indices([INT.index(), STRING.index(), 9]);
        let found = entity.get(&query);

        assert_eq!(found.len(), 2);
        assert!(found[0].is::<StringComponent>());
        assert!(found[1].is::<IntComponent>());
    }

    #[test]
    fn test_update_component() {
        let entity = Entity::new(0);
        entity.insert(INT, AnyComponent::new(IntComponent::default()));

        let mut staged = read_int(&entity).stage();
        staged.number = 10;
        assert!(submit(&entity, staged));

        let updated = read_int(&entity);
        assert_eq!(updated.number, 10);
        assert_eq!(updated.revision(), 1);
    }

    #[test]
    fn test_stale_update_rejected() {
        let entity = Entity::new(0);
        entity.insert(INT, AnyComponent::new(IntComponent::default()));

        // Two clients read the same revision
        let mut first = read_int(&entity).stage();
        first.number = 10;
        let mut second = read_int(&entity).stage();
        second.number = 20;

        assert!(submit(&entity, first));
        assert!(!submit(&entity, second));

        let stored = read_int(&entity);
        assert_eq!(stored.number, 10);
        assert_eq!(stored.revision(), 1);
    }

    #[test]
    fn test_update_absent_rejected() {
        let entity = Entity::new(0);
        let value: Arc<dyn Any + Send + Sync> = Arc::new(IntComponent::default());

        assert!(entity.update(INT, value, 0).is_none());
        assert!(!entity.has(INT));
    }

    #[test]
    fn test_update_type_mismatch_rejected() {
        let entity = Entity::new(0);
        entity.insert(INT, AnyComponent::new(IntComponent { number: 4 }));

        let value: Arc<dyn Any + Send + Sync> = Arc::new(StringComponent::default());
        assert!(entity.update(INT, value, 0).is_none());
        assert_eq!(read_int(&entity).number, 4);
    }

    #[test]
    fn test_insert_and_remove() {
        let entity = Entity::new(0);
        assert!(entity.remove(INT).is_none());

        entity.insert(INT, AnyComponent::new(IntComponent { number: 5 }));
        let removed = entity.remove(INT).unwrap();
        assert_eq!(removed.downcast::<IntComponent>().unwrap().number, 5);

        assert!(!entity.has(INT));
        assert!(entity.remove(INT).is_none());
        assert!(entity.get(&Signature::from_indices([INT.index()])).is_empty());
    }

    #[test]
    fn test_reinsert_resets_revision() {
        let entity = Entity::new(0);
        entity.insert(INT, AnyComponent::new(IntComponent::default()));
        assert!(submit(&entity, read_int(&entity).stage()));
        entity.remove(INT);

        entity.insert(INT, AnyComponent::new(IntComponent::default()));
        assert_eq!(read_int(&entity).revision(), 0);
    }

    #[test]
    fn test_get_ordered() {
        let entity = Entity::new(0);
        entity.insert(INT, AnyComponent::new(IntComponent { number: 1 }));

        assert!(entity.get_ordered(&[INT, STRING]).is_none());

        entity.insert(STRING, AnyComponent::new(StringComponent::default()));
        let row = entity.get_ordered(&[INT, STRING]).unwrap();
        assert!(row[0].is::<IntComponent>());
        assert!(row[1].is::<StringComponent>());
    }

    #[test]
    fn test_retired_entity_rejects_mutation() {
        let entity = Entity::new(0);
        entity.insert(INT, AnyComponent::new(IntComponent { number: 1 }));
        let staged = read_int(&entity).stage();

        let last = entity.retire();
        assert_eq!(last.iter_ones().collect::<Vec<_>>(), vec![INT.index()]);

        assert!(!entity.insert(STRING, AnyComponent::new(StringComponent::default())));
        assert!(!submit(&entity, staged));
        assert!(entity.remove(INT).is_none());
        assert_eq!(entity.retire(), last);
    }
}

//! Component types, tags and the handles used to share them.
//!
//! Stored components are immutable once published. Readers get a
//! [`ComponentRef`] (a shared handle plus the revision it was read at);
//! writers call [`ComponentRef::stage`] to get an owned [`Staged`] copy,
//! mutate it, and submit it back through the registry. The revision
//! travels with the copy so the store can reject writes based on a stale
//! read.

use std::{
    any::{Any, TypeId},
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;

use crate::error::{EcsError, EcsResult};

/// Marker trait for types that can be stored as components.
///
/// `Clone` is required so a reader can stage an independent copy for an
/// update without touching the published value.
pub trait Component: Clone + Send + Sync + 'static {}

// Blanket implementation for all suitable types
impl<T: Clone + Send + Sync + 'static> Component for T {}

/// Stable identifier for a component type. Tags start at 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(u32);

impl Tag {
    /// Create a tag from a raw value.
    #[must_use]
    pub const fn from_raw(tag: u32) -> Self {
        Self(tag)
    }

    /// Get the raw tag value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// The tag as a bit/slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.0)
    }
}

/// Per-component version counter used for optimistic concurrency.
pub type Revision = u64;

#[derive(Default)]
struct TypeTable {
    tags: HashMap<TypeId, Tag, FxBuildHasher>,
    names: Vec<&'static str>,
}

/// Assigns tags to component types in registration order.
///
/// One registry is shared by every store that must agree on tags. It is
/// read-mostly: registration takes the write lock once per type, every
/// later lookup only reads.
#[derive(Default)]
pub struct TypeRegistry {
    table: RwLock<TypeTable>,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` and return its tag.
    ///
    /// Idempotent: registering a type twice returns the first tag.
    pub fn register<T: 'static>(&self) -> Tag {
        let type_id = TypeId::of::<T>();

        if let Some(&tag) = self.table.read().tags.get(&type_id) {
            return tag;
        }

        let mut table = self.table.write();
        // Lost the race between dropping the read lock and taking the write lock.
        if let Some(&tag) = table.tags.get(&type_id) {
            return tag;
        }

        let tag = Tag(table.names.len() as u32 + 1);
        table.tags.insert(type_id, tag);
        table.names.push(std::any::type_name::<T>());
        tracing::debug!(?tag, name = std::any::type_name::<T>(), "registered component type");
        tag
    }

    /// Get the tag of a registered type.
    pub fn tag_of<T: 'static>(&self) -> EcsResult<Tag> {
        self.get::<T>()
            .ok_or(EcsError::UnregisteredType(std::any::type_name::<T>()))
    }

    /// Get the tag of `T`, if registered.
    #[must_use]
    pub fn get<T: 'static>(&self) -> Option<Tag> {
        self.table.read().tags.get(&TypeId::of::<T>()).copied()
    }

    /// Type name registered under `tag`.
    #[must_use]
    pub fn name(&self, tag: Tag) -> Option<&'static str> {
        let idx = tag.index().checked_sub(1)?;
        self.table.read().names.get(idx).copied()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().names.len()
    }

    /// Check if no type has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read();
        f.debug_struct("TypeRegistry")
            .field("count", &table.names.len())
            .field("components", &table.names)
            .finish()
    }
}

/// A stored component with its type erased.
///
/// This is what entity slots and views hold. Cloning shares the value.
#[derive(Clone)]
pub struct AnyComponent {
    value: Arc<dyn Any + Send + Sync>,
    revision: Revision,
}

impl AnyComponent {
    /// Wrap a fresh value at revision 0.
    pub fn new<T: Component>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            revision: 0,
        }
    }

    pub(crate) fn from_parts(value: Arc<dyn Any + Send + Sync>, revision: Revision) -> Self {
        Self { value, revision }
    }

    pub(crate) fn value_arc(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.value)
    }

    /// Revision this value was published at.
    #[must_use]
    pub const fn revision(&self) -> Revision {
        self.revision
    }

    /// `TypeId` of the stored value.
    #[must_use]
    pub fn value_type_id(&self) -> TypeId {
        (*self.value).type_id()
    }

    /// Check if the stored value is a `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Recover the typed handle, or `None` if the value is not a `T`.
    #[must_use]
    pub fn downcast<T: Component>(&self) -> Option<ComponentRef<T>> {
        let value = Arc::clone(&self.value).downcast::<T>().ok()?;
        Some(ComponentRef {
            value,
            revision: self.revision,
        })
    }
}

impl fmt::Debug for AnyComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyComponent")
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl<T: Component> From<ComponentRef<T>> for AnyComponent {
    fn from(component: ComponentRef<T>) -> Self {
        Self {
            value: component.value,
            revision: component.revision,
        }
    }
}

/// Immutable, shared handle to a published component.
///
/// Holding one never blocks writers; a later update publishes a new
/// value and leaves this one untouched.
pub struct ComponentRef<T> {
    value: Arc<T>,
    revision: Revision,
}

impl<T: Component> ComponentRef<T> {
    /// Wrap a fresh value at revision 0.
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(value),
            revision: 0,
        }
    }

    /// Revision this value was published at.
    #[must_use]
    pub const fn revision(&self) -> Revision {
        self.revision
    }

    /// Owned, mutable copy that remembers the revision it was read at.
    #[must_use]
    pub fn stage(&self) -> Staged<T> {
        Staged {
            value: T::clone(&self.value),
            revision: self.revision,
        }
    }

    pub(crate) fn into_arc(self) -> Arc<T> {
        self.value
    }

    /// Check if two handles point at the same published value.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.value, &other.value)
    }
}

impl<T> Clone for ComponentRef<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            revision: self.revision,
        }
    }
}

impl<T> Deref for ComponentRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for ComponentRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef")
            .field("value", &*self.value)
            .field("revision", &self.revision)
            .finish()
    }
}

/// An owned copy of a component, staged for an update.
///
/// Submitting it succeeds only if the stored component is still at the
/// revision this copy was read from.
#[derive(Clone)]
pub struct Staged<T> {
    value: T,
    revision: Revision,
}

impl<T: Component> Staged<T> {
    /// Revision the update is based on.
    #[must_use]
    pub const fn revision(&self) -> Revision {
        self.revision
    }

    /// Discard the revision and return the value.
    pub fn into_inner(self) -> T {
        self.value
    }

    pub(crate) fn into_parts(self) -> (Arc<dyn Any + Send + Sync>, Revision) {
        let value: Arc<dyn Any + Send + Sync> = Arc::new(self.value);
        (value, self.revision)
    }
}

impl<T> Deref for Staged<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Staged<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Staged<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Staged")
            .field("value", &self.value)
            .field("revision", &self.revision)
            .finish()
    }
}

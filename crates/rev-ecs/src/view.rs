//! Views: immutable, columnar snapshots produced by batch queries.
//!
//! A `View<(A, B, C)>` holds one row per matching entity and one column
//! per type in the tuple. Storage is a single row-major list, so row `i`
//! occupies `[i * width, i * width + width)`.
//!
//! ```ignore
//! let view = registry.query::<(Name, Health)>();
//!
//! for &entity in view.entities() {
//!     let health = view.select::<Health>(entity).unwrap();
//!     println!("{entity}: {}", health.current);
//! }
//!
//! let low = view.select_where::<Health>(|h| h.current < 10);
//! ```

use std::{any::TypeId, fmt, marker::PhantomData};

use smallvec::{SmallVec, smallvec};

use crate::{
    component::{AnyComponent, Component, ComponentRef, Tag, TypeRegistry},
    entity::EntityId,
    error::{EcsError, EcsResult},
};

// ============================================================================
// ComponentSet - tuples of component types
// ============================================================================

/// An ordered tuple of component types, used to shape a query.
///
/// Implemented for tuples of 1 to 8 components. The position of a type in
/// the tuple is its column index in the resulting [`View`].
pub trait ComponentSet: 'static {
    /// Number of columns.
    const WIDTH: usize;

    /// `TypeId` of each column, in tuple order.
    fn type_ids() -> SmallVec<[TypeId; 4]>;

    /// Tag of each column, in tuple order. Registers types as needed.
    fn tags(types: &TypeRegistry) -> SmallVec<[Tag; 4]>;
}

macro_rules! impl_component_set {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            const WIDTH: usize = [$(stringify!($name)),+].len();

            fn type_ids() -> SmallVec<[TypeId; 4]> {
                smallvec![$(TypeId::of::<$name>()),+]
            }

            fn tags(types: &TypeRegistry) -> SmallVec<[Tag; 4]> {
                smallvec![$(types.register::<$name>()),+]
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);

// ============================================================================
// View
// ============================================================================

/// Immutable snapshot of the columns `Q` for a set of entities.
///
/// Mutations made after the view was built are never observed through it.
pub struct View<Q> {
    entities: Vec<EntityId>,
    components: Vec<AnyComponent>,
    /// Column layout, fixed when the view is built.
    columns: SmallVec<[TypeId; 4]>,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: ComponentSet> View<Q> {
    /// Build a view from entity ids and their components, row-major.
    ///
    /// `components` must hold exactly `entities.len() * Q::WIDTH` entries.
    pub fn new(entities: Vec<EntityId>, components: Vec<AnyComponent>) -> EcsResult<Self> {
        if components.len() != entities.len() * Q::WIDTH {
            return Err(EcsError::ViewShape {
                entities: entities.len(),
                width: Q::WIDTH,
                components: components.len(),
            });
        }

        Ok(Self::assemble(entities, components))
    }

    /// Build a view whose shape the caller already guarantees.
    pub(crate) fn assemble(entities: Vec<EntityId>, components: Vec<AnyComponent>) -> Self {
        debug_assert_eq!(components.len(), entities.len() * Q::WIDTH);
        Self {
            entities,
            components,
            columns: Q::type_ids(),
            _marker: PhantomData,
        }
    }

    /// Number of columns.
    #[must_use]
    pub const fn width(&self) -> usize {
        Q::WIDTH
    }

    /// Entities in row order.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if no entity matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Get the component `T` captured for entity `id`.
    ///
    /// Returns `None` if the entity is not in the view, `T` is not one of
    /// the view's columns, or the stored value is not a `T`.
    #[must_use]
    pub fn select<T: Component>(&self, id: EntityId) -> Option<ComponentRef<T>> {
        let row = self.entities.iter().position(|&e| e == id)?;
        let column = self.column_of::<T>()?;
        self.components[row * Q::WIDTH + column].downcast()
    }

    /// All `(entity, T)` pairs whose component satisfies `predicate`, in row order.
    pub fn select_where<T, P>(&self, mut predicate: P) -> Vec<(EntityId, ComponentRef<T>)>
    where
        T: Component,
        P: FnMut(&T) -> bool,
    {
        let Some(column) = self.column_of::<T>() else {
            return Vec::new();
        };

        self.entities
            .iter()
            .enumerate()
            .filter_map(|(row, &entity)| {
                let component = self.components[row * Q::WIDTH + column].downcast::<T>()?;
                predicate(&component).then_some((entity, component))
            })
            .collect()
    }

    /// Every column captured for entity `id`, in tuple order.
    #[must_use]
    pub fn row(&self, id: EntityId) -> Option<&[AnyComponent]> {
        let row = self.entities.iter().position(|&e| e == id)?;
        Some(&self.components[row * Q::WIDTH..(row + 1) * Q::WIDTH])
    }

    /// Iterate over `(entity, columns)` in row order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &[AnyComponent])> + '_ {
        self.entities
            .iter()
            .copied()
            .zip(self.components.chunks_exact(Q::WIDTH))
    }

    fn column_of<T: 'static>(&self) -> Option<usize> {
        let type_id = TypeId::of::<T>();
        self.columns.iter().position(|&c| c == type_id)
    }
}

impl<Q> fmt::Debug for View<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("entities", &self.entities)
            .field("width", &self.columns.len())
            .finish()
    }
}

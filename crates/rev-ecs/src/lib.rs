#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::float_cmp)]

//! REV ECS - revision-checked, thread-safe Entity Component System
//!
//! A shared, in-memory store of typed components attached to integer
//! entities. Every operation takes `&self`, so one [`Registry`] behind an
//! `Arc` can be used from any number of threads.
//!
//! # Key Concepts
//!
//! - **Entity**: An id plus a [`Signature`] and one slot per component tag
//! - **Tag**: Stable integer id assigned to a component type by a [`TypeRegistry`]
//! - **Revision**: Per-component version counter, bumped by every update
//! - **View**: Immutable columnar snapshot returned by [`Registry::query`]
//! - **Subscription**: Callback run after every change to one component type
//!
//! # Access Patterns
//!
//! Reads return shared, immutable handles. Writes go through a staged copy
//! and are accepted only if nobody else published in between:
//! - `select<T>()` - Returns a [`ComponentRef<T>`] carrying its revision
//! - `stage()` - Owned, mutable copy of a read value
//! - `update()` - Publish a staged copy (first committer wins)
//! - `modify()` - Re-read and retry until the update lands
//!
//! ```ignore
//! let registry = Registry::new();
//! let e = registry.create_entity();
//! registry.insert(e, Position { x: 0.0, y: 0.0 });
//!
//! let _sub = registry.subscribe::<Position, _>(|n| {
//!     tracing::info!(entity = n.entity, op = %n.operation, "position changed");
//! });
//!
//! registry.modify::<Position, _>(e, |p| p.x += 1.0);
//! ```

mod component;
mod entity;
mod error;
mod notification;
mod registry;
mod signature;
mod subscription;
mod view;

pub use component::{AnyComponent, Component, ComponentRef, Revision, Staged, Tag, TypeRegistry};
pub use entity::{Entity, EntityId};
pub use error::{EcsError, EcsResult};
pub use notification::{Notification, Operation};
pub use registry::{Registry, UncheckedMut};
pub use signature::Signature;
pub use subscription::{SubscriptionId, Unsubscribe};
pub use view::{ComponentSet, View};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Component, ComponentRef, EntityId, Notification, Operation, Registry, Staged, Unsubscribe,
        View,
    };
}

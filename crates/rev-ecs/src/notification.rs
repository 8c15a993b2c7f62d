//! Change notifications delivered to subscribers.

use std::fmt;

use crate::{
    component::{Component, ComponentRef},
    entity::EntityId,
};

/// Kind of change that produced a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Inserted,
    Updated,
    Removed,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Removed => "removed",
        })
    }
}

/// A component of type `T` changed on `entity`.
///
/// `component` is the value published by an insert or update. Removals
/// carry no value.
pub struct Notification<T> {
    pub operation: Operation,
    pub entity: EntityId,
    pub component: Option<ComponentRef<T>>,
}

impl<T: Component> Notification<T> {
    pub(crate) const fn new(
        operation: Operation,
        entity: EntityId,
        component: Option<ComponentRef<T>>,
    ) -> Self {
        Self {
            operation,
            entity,
            component,
        }
    }
}

impl<T> Clone for Notification<T> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation,
            entity: self.entity,
            component: self.component.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Notification<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("operation", &self.operation)
            .field("entity", &self.entity)
            .field("component", &self.component)
            .finish()
    }
}

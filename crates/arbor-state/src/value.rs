//! Type-erased payloads for discrete variables and cache entries.

use crate::{Error, Result};
use std::any::{Any, type_name};
use std::fmt::Debug;

/// Object-safe view of a clonable, debuggable value.
pub trait Payload: Any + Debug + Send + Sync {
    /// Clone behind the trait object.
    fn clone_box(&self) -> Box<dyn Payload>;
    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Mutable upcast for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Clone + Debug + Send + Sync> Payload for T {
    fn clone_box(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A value of some concrete type, remembered by name for error reporting.
#[derive(Debug)]
pub struct Value {
    type_name: &'static str,
    payload: Box<dyn Payload>,
}

impl Value {
    /// Wrap a concrete value.
    pub fn new<T: Any + Clone + Debug + Send + Sync>(value: T) -> Self {
        Self {
            type_name: type_name::<T>(),
            payload: Box::new(value),
        }
    }

    /// Name of the stored type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the stored value has type `T`.
    pub fn is<T: Any>(&self) -> bool {
        (*self.payload).as_any().is::<T>()
    }

    /// Borrow the stored value as `T`.
    pub fn get<T: Any>(&self) -> Result<&T> {
        let stored = self.type_name;
        (*self.payload)
            .as_any()
            .downcast_ref::<T>()
            .ok_or(Error::TypeMismatch {
                stored,
                requested: type_name::<T>(),
            })
    }

    /// Mutably borrow the stored value as `T`.
    pub fn get_mut<T: Any>(&mut self) -> Result<&mut T> {
        let stored = self.type_name;
        (*self.payload)
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(Error::TypeMismatch {
                stored,
                requested: type_name::<T>(),
            })
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        Self {
            type_name: self.type_name,
            payload: (*self.payload).clone_box(),
        }
    }
}

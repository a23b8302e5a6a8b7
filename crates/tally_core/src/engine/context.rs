use std::any::{Any, TypeId};

use rustc_hash::FxHashMap;

/// Typed values shared by the bodies and middleware of one tick.
///
/// A fresh context is created at the start of every top-level tick.
#[derive(Debug, Default)]
pub struct Context {
    tick: u32,
    values: FxHashMap<TypeId, Box<dyn Any>>,
}

impl Context {
    pub(crate) fn for_tick(tick: u32) -> Self {
        Context {
            tick,
            values: FxHashMap::default(),
        }
    }

    /// One-based index of the current tick of the top-level test.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Store `value`, returning the previous value of the same type.
    pub fn insert<T: 'static>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|old| *old)
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.values.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast().ok())
            .map(|old| *old)
    }
}

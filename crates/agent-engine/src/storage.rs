//! Typed run-scoped storage shared by the nodes of one agent run
//!
//! Values are held as `Box<dyn Any>`, so anything `Send + Sync` fits,
//! including handles that cannot be serialized. Keys carry the value type,
//! which makes a type-mismatched read impossible at the call site.
//!
//! # Example
//!
//! ```ignore
//! const ATTEMPTS: StorageKey<u32> = StorageKey::new("attempts");
//!
//! ctx.storage().set(&ATTEMPTS, 1);
//! let n = ctx.storage().get(&ATTEMPTS).unwrap_or(0);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;

use parking_lot::Mutex;

/// A named key bound to a value type
pub struct StorageKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StorageKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StorageKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StorageKey<T> {}

impl<T> std::fmt::Debug for StorageKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageKey({})", self.name)
    }
}

/// Typed key/value map for one run
#[derive(Default)]
pub struct AgentStorage {
    inner: Mutex<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
}

impl AgentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous one under the same key
    pub fn set<T: Send + Sync + 'static>(&self, key: &StorageKey<T>, value: T) {
        self.inner.lock().insert(key.name, Box::new(value));
    }

    /// Clone out the value under `key`
    ///
    /// Returns `None` if the key is absent or was stored with another type.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &StorageKey<T>) -> Option<T> {
        self.inner
            .lock()
            .get(key.name)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Take the value out of storage
    pub fn remove<T: Send + Sync + 'static>(&self, key: &StorageKey<T>) -> Option<T> {
        let mut inner = self.inner.lock();
        if !inner.get(key.name).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        inner
            .remove(key.name)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn contains<T: Send + Sync + 'static>(&self, key: &StorageKey<T>) -> bool {
        self.inner.lock().get(key.name).is_some_and(|v| v.is::<T>())
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl std::fmt::Debug for AgentStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.inner.lock().keys().copied().collect();
        f.debug_struct("AgentStorage").field("keys", &keys).finish()
    }
}

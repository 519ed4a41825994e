//! The per-session settings bag.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Named, type-erased values attached to a session or a single scope.
///
/// Values are immutable once stored, so cloning the bag copies the map
/// and shares the values.
#[derive(Clone, Default)]
pub struct Settings {
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Arc::new(value));
    }

    /// A copy of the value stored under `name`, if it has type `T`.
    pub fn get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.get_ref::<T>(name).cloned()
    }

    pub fn get_ref<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.values.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Settings").field("keys", &keys).finish()
    }
}

//! Tab/target registry: the id-keyed collection of in-flight slots.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Arena of shared slots keyed by an opaque id. Each slot owns its own state;
/// the registry only hands out `Arc`s.
#[derive(Debug)]
pub struct Registry<T> {
    slots: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.slots.read().get(id).cloned()
    }

    /// Existing slot for `id`, or a new one built by `create`.
    pub fn get_or_insert_with(&self, id: &str, create: impl FnOnce() -> T) -> Arc<T> {
        if let Some(slot) = self.get(id) {
            return slot;
        }
        self.slots
            .write()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }

    /// Insert a slot, returning the one it replaced.
    pub fn insert(&self, id: impl Into<String>, slot: impl Into<Arc<T>>) -> Option<Arc<T>> {
        self.slots.write().insert(id.into(), slot.into())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.slots.write().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.read().contains_key(id)
    }

    /// Ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn values(&self) -> Vec<Arc<T>> {
        self.slots.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

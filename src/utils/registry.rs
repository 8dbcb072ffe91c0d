use std::sync::Arc;

use parking_lot::RwLock;

use super::{Handle, Pool};

/// Thread-safe pool of immutable, shared objects.
///
/// Lookups hand out `Arc` clones, so a reader never holds the lock while it
/// uses an object and destruction never invalidates an in-flight replay.
pub struct Registry<T> {
    pool: RwLock<Pool<Arc<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            pool: RwLock::new(Pool::new(0)),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: T) -> Option<Handle<T>> {
        self.pool.write().insert(Arc::new(item)).map(Handle::cast)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<Arc<T>> {
        self.pool.read().get_ref(handle.cast()).cloned()
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.pool.read().is_live(handle.cast())
    }

    pub fn remove(&self, handle: Handle<T>) -> Option<Arc<T>> {
        self.pool.write().release(handle.cast())
    }

    pub fn len(&self) -> usize {
        self.pool.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.pool.write().clear();
    }
}

//! LRU cache of materialized configuration objects.

use lru::LruCache;
use parking_lot::Mutex;
use std::any::Any;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

type Entry = Arc<dyn Any + Send + Sync>;

/// Smallest capacity the cache accepts
pub const MIN_CAPACITY: usize = 10;

/// Objects keyed by type and restricted context id
pub struct ObjectCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl ObjectCache {
    /// Create a cache holding at most `capacity` objects (at least
    /// [`MIN_CAPACITY`]).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(Self::clamp(capacity))),
        }
    }

    fn clamp(capacity: usize) -> NonZeroUsize {
        NonZeroUsize::new(capacity.max(MIN_CAPACITY)).unwrap_or(NonZeroUsize::MIN)
    }

    /// Cached object for `key`, if present and of type `T`
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let entry = self.entries.lock().get(key).cloned()?;
        entry.downcast::<T>().ok()
    }

    pub fn put<T: Send + Sync + 'static>(&self, key: String, value: Arc<T>) {
        if let Some((evicted, _)) = self.entries.lock().push(key, value) {
            debug!("Evicted cached configuration object {}", evicted);
        }
    }

    /// Drop every cached object
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_same_instance() {
        let cache = ObjectCache::new(16);
        let value = Arc::new(String::from("cached"));
        cache.put("k".to_string(), value.clone());

        let hit: Arc<String> = cache.get("k").unwrap();
        assert!(Arc::ptr_eq(&hit, &value));
        assert!(cache.get::<u32>("k").is_none());
        assert!(cache.get::<String>("missing").is_none());
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = ObjectCache::new(MIN_CAPACITY);
        for i in 0..MIN_CAPACITY {
            cache.put(format!("k{}", i), Arc::new(i));
        }
        // Touch k0 so k1 becomes the oldest.
        assert!(cache.get::<usize>("k0").is_some());
        cache.put("extra".to_string(), Arc::new(99usize));

        assert_eq!(cache.len(), MIN_CAPACITY);
        assert!(cache.get::<usize>("k0").is_some());
        assert!(cache.get::<usize>("k1").is_none());
    }

    #[test]
    fn test_capacity_has_a_floor() {
        let cache = ObjectCache::new(1);
        assert_eq!(cache.capacity(), MIN_CAPACITY);
        assert_eq!(ObjectCache::new(50).capacity(), 50);
    }

    #[test]
    fn test_clear() {
        let cache = ObjectCache::new(10);
        cache.put("a".to_string(), Arc::new(1u8));
        cache.clear();
        assert!(cache.is_empty());
    }
}

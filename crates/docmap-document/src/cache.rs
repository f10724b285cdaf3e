use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use docmap_types::ObjectId;

use crate::document::Document;

/// Fixed-capacity cache with first-in-first-out eviction.
///
/// Keys are remembered in insertion order. Once `capacity` is exceeded the
/// oldest inserted key is evicted, regardless of how recently it was read.
/// Re-inserting an existing key replaces its value but keeps its position.
#[derive(Debug, Clone)]
pub struct FifoCache<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> FifoCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert a value, returning the evicted entry if one was pushed out.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.capacity == 0 {
            return None;
        }
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return None;
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        if self.order.len() > self.capacity {
            let oldest = self.order.pop_front()?;
            let evicted = self.entries.remove(&oldest)?;
            return Some((oldest, evicted));
        }
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    /// Keys from oldest to newest.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }
}

/// Key of a resolved reference target: schema name and document id.
pub type ReferenceKey = (String, ObjectId);

/// Dedup cache for resolved reference targets, scoped to one query set.
pub type ReferenceCache = FifoCache<ReferenceKey, Document>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_insert() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, Some(("a", 1)));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn reads_do_not_refresh_position() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(&1));
        cache.insert("c", 3);
        assert!(!cache.contains(&"a"));
    }

    #[test]
    fn reinsert_replaces_in_place() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.get(&"a"), Some(&10));
        cache.insert("c", 3);
        assert_eq!(cache.keys().copied().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut cache = FifoCache::new(0);
        cache.insert("a", 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_and_clear() {
        let mut cache = FifoCache::new(3);
        cache.insert(1, "x");
        cache.insert(2, "y");
        assert_eq!(cache.remove(&1), Some("x"));
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec![&2]);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 3);
    }
}

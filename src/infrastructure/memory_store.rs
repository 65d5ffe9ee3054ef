//! In-memory store backed by DashMap.

use crate::application::ports::{StorageError, Store};
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe in-memory key-value store.
///
/// Clones share the same map, so two controllers built over clones of one
/// `MemoryStore` see each other's writes the way two tabs share a browser
/// profile. Contents are lost when the last clone is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Check if a key is stored.
    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.get(key).map(|value| value.clone()))
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StorageError> {
        self.map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.load("a").unwrap(), None);

        store.save("a", b"1").unwrap();
        assert_eq!(store.load("a").unwrap(), Some(b"1".to_vec()));
        assert!(store.contains_key("a"));

        store.save("a", b"2").unwrap();
        assert_eq!(store.load("a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);

        store.clear("a").unwrap();
        assert_eq!(store.load("a").unwrap(), None);
        // Clearing a missing key succeeds
        store.clear("a").unwrap();
    }

    #[test]
    fn test_clones_share_contents() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.save("k", b"v").unwrap();
        assert_eq!(other.load("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_concurrent_access() {
        let store = MemoryStore::new();
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        store.save(&format!("{}-{}", i, j), &[i as u8]).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1000);
    }
}

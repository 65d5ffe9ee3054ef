//! Mock store with fault injection.

use crate::application::ports::{StorageError, Store};
use crate::infrastructure::memory_store::MemoryStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory store whose reads, writes and clears can be made to fail.
///
/// Clones share contents and fault switches, so a test can keep one clone
/// to inspect or sabotage the store while a controller owns another.
///
/// # Examples
///
/// ```
/// use visit_throttle::infrastructure::mocks::MockStore;
/// use visit_throttle::application::ports::{StorageError, Store};
///
/// let store = MockStore::new();
/// store.save("k", b"v").unwrap();
/// assert_eq!(store.get("k"), Some(b"v".to_vec()));
///
/// store.fail_writes(true);
/// assert_eq!(store.save("k", b"w"), Err(StorageError::QuotaExceeded));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_clears: AtomicBool,
    writes: AtomicUsize,
}

impl MockStore {
    /// Create an empty store with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `load` fail with `StorageError::Unavailable`.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `save` fail with `StorageError::QuotaExceeded`.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every `clear` fail with `StorageError::Unavailable`.
    pub fn fail_clears(&self, fail: bool) {
        self.faults.fail_clears.store(fail, Ordering::SeqCst);
    }

    /// Read a raw value, bypassing fault injection.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.load(key).ok().flatten()
    }

    /// Write a raw value, bypassing fault injection and the write counter.
    pub fn insert(&self, key: &str, value: impl Into<Vec<u8>>) {
        let _ = self.inner.save(key, &value.into());
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.faults.writes.load(Ordering::SeqCst)
    }
}

impl Store for MockStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable);
        }
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded);
        }
        self.inner.save(key, value)?;
        self.faults.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StorageError> {
        if self.faults.fail_clears.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable);
        }
        self.inner.clear(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_switches() {
        let store = MockStore::new();
        store.insert("k", b"v".to_vec());

        store.fail_reads(true);
        assert_eq!(store.load("k"), Err(StorageError::Unavailable));
        assert_eq!(store.get("k"), Some(b"v".to_vec()));
        store.fail_reads(false);

        store.fail_clears(true);
        assert_eq!(store.clear("k"), Err(StorageError::Unavailable));
        store.fail_clears(false);
        store.clear("k").unwrap();
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_write_count() {
        let store = MockStore::new();
        store.save("a", b"1").unwrap();
        store.save("a", b"2").unwrap();
        store.fail_writes(true);
        let _ = store.save("a", b"3");
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.get("a"), Some(b"2".to_vec()));
    }
}

//! Fail-open persistence of a single value under one store key.
//!
//! A slot never surfaces storage problems to its caller:
//! - Missing values load as `None` so the caller starts from defaults
//! - Corrupt values are logged and treated as missing
//! - A failed read switches the slot to memory-only mode and tells the
//!   caller to start over from defaults
//! - A failed write switches the slot to memory-only mode; the caller keeps
//!   working from its in-memory copy

use crate::application::metrics::Metrics;
use crate::application::ports::Store;
use crate::domain::state::StateError;

/// Whether a slot still talks to its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Reads and writes go to the store
    Durable,
    /// The store failed; state lives in memory only
    MemoryOnly,
}

/// Outcome of loading a slot.
#[derive(Debug)]
pub(crate) enum Loaded<T> {
    /// A stored value was decoded
    Value(T),
    /// Nothing usable is stored; start from defaults
    Empty,
    /// This read failed and the slot went memory-only; start from defaults
    ReadFailed,
    /// The slot is memory-only; use the in-memory copy
    Unavailable,
}

/// One store key with fail-open read/write semantics.
#[derive(Debug)]
pub(crate) struct PersistedSlot<S> {
    store: S,
    key: String,
    mode: PersistenceMode,
    metrics: Metrics,
}

impl<S: Store> PersistedSlot<S> {
    pub(crate) fn new(store: S, key: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            store,
            key: key.into(),
            mode: PersistenceMode::Durable,
            metrics,
        }
    }

    pub(crate) fn mode(&self) -> PersistenceMode {
        self.mode
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Load and decode the stored value.
    ///
    /// A read failure switches the slot to memory-only mode and reports
    /// `ReadFailed` once; later loads report `Unavailable`.
    pub(crate) fn load<T, D>(&mut self, decode: D) -> Loaded<T>
    where
        D: FnOnce(&[u8]) -> Result<T, StateError>,
    {
        if self.mode == PersistenceMode::MemoryOnly {
            return Loaded::Unavailable;
        }
        match self.store.load(&self.key) {
            Ok(bytes) => self.decode(bytes, decode),
            Err(e) => {
                self.metrics.record_store_failure();
                self.degrade(&e);
                Loaded::ReadFailed
            }
        }
    }

    /// Load and decode the stored value without changing the slot's mode.
    pub(crate) fn peek<T, D>(&self, decode: D) -> Loaded<T>
    where
        D: FnOnce(&[u8]) -> Result<T, StateError>,
    {
        if self.mode == PersistenceMode::MemoryOnly {
            return Loaded::Unavailable;
        }
        match self.store.load(&self.key) {
            Ok(bytes) => self.decode(bytes, decode),
            Err(e) => {
                tracing::debug!(key = %self.key, error = %e, "Read-only load failed");
                Loaded::Unavailable
            }
        }
    }

    fn decode<T, D>(&self, bytes: Option<Vec<u8>>, decode: D) -> Loaded<T>
    where
        D: FnOnce(&[u8]) -> Result<T, StateError>,
    {
        let Some(bytes) = bytes else {
            return Loaded::Empty;
        };
        match decode(&bytes) {
            Ok(value) => Loaded::Value(value),
            Err(e) => {
                self.metrics.record_corrupt_state();
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    "Discarding corrupt persisted state"
                );
                Loaded::Empty
            }
        }
    }

    /// Persist an encoded value.
    ///
    /// A write failure switches the slot to memory-only mode.
    pub(crate) fn save(&mut self, encoded: Result<Vec<u8>, StateError>) {
        if self.mode == PersistenceMode::MemoryOnly {
            return;
        }
        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to encode state");
                return;
            }
        };
        if let Err(e) = self.store.save(&self.key, &bytes) {
            self.metrics.record_store_failure();
            self.degrade(&e);
        }
    }

    /// Remove the stored value.
    ///
    /// Attempted even in memory-only mode so a reset does not leave a stale
    /// value behind for the next session. A failure switches the slot to
    /// memory-only mode.
    pub(crate) fn clear(&mut self) {
        if let Err(e) = self.store.clear(&self.key) {
            self.metrics.record_store_failure();
            self.degrade(&e);
        }
    }

    fn degrade(&mut self, error: &dyn std::error::Error) {
        if self.mode == PersistenceMode::MemoryOnly {
            tracing::debug!(key = %self.key, error = %error, "Store still failing");
            return;
        }
        self.mode = PersistenceMode::MemoryOnly;
        tracing::warn!(
            key = %self.key,
            error = %error,
            "Store failed, continuing with in-memory state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockStore;

    fn decode_u8(bytes: &[u8]) -> Result<u8, StateError> {
        match bytes {
            [b] => Ok(*b),
            _ => Err(StateError::Invalid("expected one byte")),
        }
    }

    #[test]
    fn test_load_empty_and_value() {
        let store = MockStore::new();
        let mut slot = PersistedSlot::new(store.clone(), "k", Metrics::new());
        assert!(matches!(slot.load(decode_u8), Loaded::Empty));

        slot.save(Ok(vec![7]));
        assert!(matches!(slot.load(decode_u8), Loaded::Value(7)));
        assert_eq!(store.get("k"), Some(vec![7]));
    }

    #[test]
    fn test_corrupt_value_loads_empty() {
        let store = MockStore::new();
        store.insert("k", b"garbage".to_vec());
        let metrics = Metrics::new();
        let mut slot = PersistedSlot::new(store, "k", metrics.clone());

        assert!(matches!(slot.load(decode_u8), Loaded::Empty));
        assert_eq!(slot.mode(), PersistenceMode::Durable);
        assert_eq!(metrics.corrupt_states(), 1);
    }

    #[test]
    fn test_write_failure_degrades() {
        let store = MockStore::new();
        let metrics = Metrics::new();
        let mut slot = PersistedSlot::new(store.clone(), "k", metrics.clone());

        store.fail_writes(true);
        slot.save(Ok(vec![1]));
        assert_eq!(slot.mode(), PersistenceMode::MemoryOnly);
        assert_eq!(metrics.store_failures(), 1);

        // Memory-only slots stop touching the store
        store.fail_writes(false);
        slot.save(Ok(vec![2]));
        assert_eq!(store.get("k"), None);
        assert!(matches!(slot.load(decode_u8), Loaded::<u8>::Unavailable));
    }

    #[test]
    fn test_read_failure_degrades_but_peek_does_not() {
        let store = MockStore::new();
        store.fail_reads(true);

        let slot = PersistedSlot::new(store.clone(), "k", Metrics::new());
        assert!(matches!(slot.peek(decode_u8), Loaded::<u8>::Unavailable));
        assert_eq!(slot.mode(), PersistenceMode::Durable);

        let mut slot = slot;
        assert!(matches!(slot.load(decode_u8), Loaded::<u8>::ReadFailed));
        assert_eq!(slot.mode(), PersistenceMode::MemoryOnly);

        // Only the failing read reports it; afterwards the slot is memory-only
        store.fail_reads(false);
        assert!(matches!(slot.load(decode_u8), Loaded::<u8>::Unavailable));
    }

    #[test]
    fn test_clear_attempted_when_memory_only() {
        let store = MockStore::new();
        store.insert("k", vec![3]);
        let mut slot = PersistedSlot::new(store.clone(), "k", Metrics::new());

        store.fail_writes(true);
        slot.save(Ok(vec![4]));
        store.fail_writes(false);

        slot.clear();
        assert_eq!(store.get("k"), None);
        assert_eq!(slot.key(), "k");
    }
}

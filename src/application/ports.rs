//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::Timestamp;
use std::fmt::Debug;
use std::sync::Arc;

/// Port for obtaining the current wall-clock time.
///
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> Timestamp;
}

/// Error returned by a [`Store`] operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store is not present or has been disabled
    Unavailable,
    /// The store refused the write because it is full
    QuotaExceeded,
    /// Local I/O failure
    Io(String),
    /// Failure reported by a remote backend
    Backend(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Unavailable => write!(f, "storage is unavailable"),
            StorageError::QuotaExceeded => write!(f, "storage quota exceeded"),
            StorageError::Io(e) => write!(f, "storage I/O error: {}", e),
            StorageError::Backend(e) => write!(f, "storage backend error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Port for a persistent key-value store.
///
/// Values are opaque bytes. Calls are synchronous with bounded latency.
/// Several handles may share the same underlying profile, and no
/// compare-and-swap is offered: concurrent read-modify-write sequences from
/// different handles are last-write-wins.
pub trait Store: Send + Sync + Debug {
    /// Read the value stored under `key`.
    ///
    /// # Returns
    /// `Ok(None)` if nothing is stored under the key.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove the value stored under `key`. Removing a missing key succeeds.
    fn clear(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: Store + ?Sized> Store for Arc<T> {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).load(key)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        (**self).save(key, value)
    }

    fn clear(&self, key: &str) -> Result<(), StorageError> {
        (**self).clear(key)
    }
}

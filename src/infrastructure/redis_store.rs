//! Redis-backed store.
//!
//! Lets several processes share one profile's admission state. Values are
//! the same JSON bytes the other stores hold, stored under a configurable
//! key prefix with an optional TTL.
//!
//! ## Concurrency
//!
//! Redis does not change the read-modify-write semantics of the controller:
//! each check reads, evaluates and writes back without a transaction, so
//! concurrent writers are last-write-wins exactly as with a shared
//! in-memory or file store.
//!
//! ## Error Handling
//!
//! Connection and command failures are returned as
//! `StorageError::Backend`; the controller logs them and falls back to
//! in-memory state. A failed connection is dropped and re-established on
//! the next call.
//!
//! ## Example
//!
//! ```rust,ignore
//! use visit_throttle::{AdmissionController, RedisStore, RedisStoreConfig};
//! use std::time::Duration;
//!
//! let config = RedisStoreConfig {
//!     key_prefix: "visit-throttle:user-42:".to_string(),
//!     ttl: Some(Duration::from_secs(2 * 3600)),
//! };
//! let store = RedisStore::open_with_config("redis://127.0.0.1/", config)
//!     .expect("invalid Redis URL");
//! let controller = AdmissionController::builder().build(store).unwrap();
//! ```

use crate::application::ports::{StorageError, Store};
use redis::{Client, Commands, Connection, RedisError};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Configuration for Redis storage.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every key (default: "visit-throttle:")
    pub key_prefix: String,
    /// Expiry applied on every write; `None` keeps values forever
    pub ttl: Option<Duration>,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "visit-throttle:".to_string(),
            ttl: None,
        }
    }
}

/// Redis-backed [`Store`].
///
/// Clones share one lazily opened connection.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    connection: Arc<Mutex<Option<Connection>>>,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl From<RedisError> for StorageError {
    fn from(e: RedisError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl RedisStore {
    /// Create a store with default configuration.
    ///
    /// No connection is made until the first operation.
    ///
    /// # Errors
    /// Returns error if the URL is invalid.
    pub fn open(url: &str) -> Result<Self, RedisError> {
        Self::open_with_config(url, RedisStoreConfig::default())
    }

    /// Create a store with custom configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid.
    pub fn open_with_config(url: &str, config: RedisStoreConfig) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Arc::new(Mutex::new(None)),
            config,
        })
    }

    /// The store configuration.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Run `op` on the shared connection, opening it if needed.
    ///
    /// The connection is discarded after a failure so the next call
    /// reconnects.
    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, RedisError>,
    ) -> Result<T, StorageError> {
        let mut guard = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if guard.is_none() {
            *guard = Some(self.client.get_connection()?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StorageError::Unavailable);
        };

        match op(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                *guard = None;
                Err(e.into())
            }
        }
    }
}

impl Store for RedisStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = self.key(key);
        self.with_connection(|conn| conn.get(&key))
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = self.key(key);
        match self.config.ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.with_connection(|conn| conn.set_ex(&key, value.to_vec(), secs))
            }
            None => self.with_connection(|conn| conn.set(&key, value.to_vec())),
        }
    }

    fn clear(&self, key: &str) -> Result<(), StorageError> {
        let key = self.key(key);
        self.with_connection(|conn| conn.del(&key))
    }
}

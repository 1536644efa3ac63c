//! Key-value backend abstraction shared by the SQLite database and the
//! in-memory store used for tests and one-off simulations.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::DatabaseError;

/// Synchronous string key-value store.
///
/// Implementations must be safe to share between tasks; every call is a
/// single atomic read or write and the last write to a key wins.
pub trait KvStore: Send + Sync {
    fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError>;
    fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError>;
    /// Deleting a missing key is not an error.
    fn kv_delete(&self, key: &str) -> Result<(), DatabaseError>;
    /// Keys starting with `prefix`, in ascending order.
    fn kv_keys(&self, prefix: &str) -> Result<Vec<String>, DatabaseError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, DatabaseError> {
        self.entries.lock().map_err(|_| DatabaseError::Unavailable)
    }
}

impl KvStore for MemoryKv {
    fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn kv_delete(&self, key: &str) -> Result<(), DatabaseError> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn kv_keys(&self, prefix: &str) -> Result<Vec<String>, DatabaseError> {
        Ok(self
            .entries()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

impl<T: KvStore + ?Sized> KvStore for std::sync::Arc<T> {
    fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        (**self).kv_get(key)
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        (**self).kv_set(key, value)
    }

    fn kv_delete(&self, key: &str) -> Result<(), DatabaseError> {
        (**self).kv_delete(key)
    }

    fn kv_keys(&self, prefix: &str) -> Result<Vec<String>, DatabaseError> {
        (**self).kv_keys(prefix)
    }
}

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry connection error: {0}")]
    Connection(String),

    #[error("registry command error: {0}")]
    Command(String),
}

/// TTL key-value store. Per-key operations must be atomic; nothing else is
/// required of the backend.
pub trait RevocationRegistry: Send + Sync {
    /// Insert or overwrite `key`, expiring after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RegistryError>;

    /// The value under `key`, or `None` if it is missing or expired.
    fn get(&self, key: &str) -> Result<Option<String>, RegistryError>;

    /// Remove `key`. Returns whether a live entry was removed.
    fn delete(&self, key: &str) -> Result<bool, RegistryError>;

    /// Every live key starting with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, RegistryError>;
}

impl<R> RevocationRegistry for Arc<R>
where
    R: RevocationRegistry + ?Sized,
{
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RegistryError> {
        (**self).set(key, value, ttl)
    }

    fn get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> Result<bool, RegistryError> {
        (**self).delete(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        (**self).scan_prefix(prefix)
    }
}

//! Redis-backed revocation registry.
//!
//! - `set` is `SET key value PX ttl_ms`
//! - `get` is `GET`, `delete` is `DEL`
//! - `scan_prefix` walks `SCAN MATCH <escaped prefix>*`
//!
//! Expiry is left entirely to Redis.

use std::sync::Arc;
use std::time::Duration;

use redis::Commands;
use tracing::instrument;

use super::r#trait::{RegistryError, RevocationRegistry};

#[derive(Debug, Clone)]
pub struct RedisRevocationRegistry {
    client: Arc<redis::Client>,
}

impl RedisRevocationRegistry {
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, RegistryError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RegistryError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn connection(&self) -> Result<redis::Connection, RegistryError> {
        self.client
            .get_connection()
            .map_err(|e| RegistryError::Connection(e.to_string()))
    }
}

/// Redis rejects a zero expiry.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escape glob metacharacters so the prefix matches literally.
fn glob_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl RevocationRegistry for RedisRevocationRegistry {
    #[instrument(skip(self, value), err)]
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RegistryError> {
        let mut conn = self.connection()?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query::<()>(&mut conn)
            .map_err(|e| RegistryError::Command(e.to_string()))
    }

    #[instrument(skip(self), err)]
    fn get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(key)
            .query::<Option<String>>(&mut conn)
            .map_err(|e| RegistryError::Command(e.to_string()))
    }

    #[instrument(skip(self), err)]
    fn delete(&self, key: &str) -> Result<bool, RegistryError> {
        let mut conn = self.connection()?;
        let removed = redis::cmd("DEL")
            .arg(key)
            .query::<i64>(&mut conn)
            .map_err(|e| RegistryError::Command(e.to_string()))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), err)]
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        let mut conn = self.connection()?;
        let pattern = format!("{}*", glob_escape(prefix));
        let keys: redis::Iter<'_, String> = conn
            .scan_match(pattern)
            .map_err(|e| RegistryError::Command(e.to_string()))?;

        let mut keys: Vec<String> = keys.collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

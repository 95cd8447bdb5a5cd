use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::r#trait::{RegistryError, RevocationRegistry};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory TTL registry for tests/dev.
///
/// Expired entries are treated as absent on read and dropped lazily on the
/// next write.
#[derive(Debug, Default)]
pub struct InMemoryRevocationRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    /// Simulated time added to the wall clock.
    skew: RwLock<Duration>,
}

impl InMemoryRevocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `by` has elapsed, so entries expire without sleeping.
    pub fn advance_clock(&self, by: Duration) {
        if let Ok(mut skew) = self.skew.write() {
            *skew += by;
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn now(&self) -> Instant {
        let skew = self.skew.read().map(|s| *s).unwrap_or_default();
        Instant::now() + skew
    }
}

fn poisoned() -> RegistryError {
    RegistryError::Connection("lock poisoned".to_string())
}

impl RevocationRegistry for InMemoryRevocationRegistry {
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RegistryError> {
        let now = self.now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        let now = self.now();
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone()))
    }

    fn delete(&self, key: &str) -> Result<bool, RegistryError> {
        let now = self.now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(entries.remove(key).is_some_and(|e| e.expires_at > now))
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        let now = self.now();
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn entries_expire_after_ttl() {
        let registry = InMemoryRevocationRegistry::new();
        registry.set("auth.live.a", "{}", MINUTE).unwrap();
        assert_eq!(registry.get("auth.live.a").unwrap().as_deref(), Some("{}"));

        registry.advance_clock(MINUTE);
        assert_eq!(registry.get("auth.live.a").unwrap(), None);
        assert!(!registry.delete("auth.live.a").unwrap());
    }

    #[test]
    fn delete_removes_live_entries() {
        let registry = InMemoryRevocationRegistry::new();
        registry.set("auth.live.a", "{}", MINUTE).unwrap();
        assert!(registry.delete("auth.live.a").unwrap());
        assert!(registry.get("auth.live.a").unwrap().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn scan_matches_prefix_and_skips_expired() {
        let registry = InMemoryRevocationRegistry::new();
        registry.set("auth.live.a", "1", MINUTE * 2).unwrap();
        registry.set("auth.live.b", "2", MINUTE / 2).unwrap();
        registry.set("other.c", "3", MINUTE * 2).unwrap();

        assert_eq!(
            registry.scan_prefix("auth.live.").unwrap(),
            vec!["auth.live.a".to_string(), "auth.live.b".to_string()]
        );

        registry.advance_clock(MINUTE);
        assert_eq!(registry.scan_prefix("auth.live.").unwrap(), vec!["auth.live.a".to_string()]);
        assert_eq!(registry.len(), 2);
    }
}

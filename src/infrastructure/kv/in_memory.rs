//! In-memory key-value store
//!
//! Suitable for development, tests, and single-process deployments. Expiry is
//! enforced lazily on read using the tokio clock, so tests can drive TTL
//! behavior with paused time.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::CacheError;
use crate::domain::cache::KvStore;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory [`KvStore`] with per-entry TTL and tag-set support.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes expired entries eagerly. Returns the count.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, v| !v.is_expired());
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|v| !v.is_expired())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn glob_to_regex(pattern: &str) -> Result<regex::Regex, CacheError> {
        regex::Regex::new(&format!(
            "^{}$",
            regex::escape(pattern).replace(r"\*", ".*")
        ))
        .map_err(|e| CacheError::store_unavailable(format!("Invalid pattern '{}': {}", pattern, e)))
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(key)
            .filter(|v| !v.is_expired())
            .map(|v| v.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let live = entries.get(key).is_some_and(|v| !v.is_expired());
        if live {
            Ok(false)
        } else {
            entries.insert(key.to_string(), StoredValue::new(value, ttl));
            Ok(true)
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries.remove(key).is_some_and(|v| !v.is_expired()))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let matches = entries
            .get(key)
            .is_some_and(|v| !v.is_expired() && v.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let regex = Self::glob_to_regex(pattern)?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        let matching: Vec<String> = entries
            .iter()
            .filter(|(k, v)| !v.is_expired() && regex.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        let count = matching.len();
        for key in matching {
            entries.remove(&key);
        }
        Ok(count)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        sets.entry(key.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        Ok(sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = sets.get_mut(key) {
            for member in members {
                set.remove(member);
            }
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }
}

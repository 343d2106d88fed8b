//! Key-value store trait

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::CacheError;

/// Networked key-value store adapter.
///
/// Values are opaque strings (the facade stores JSON envelopes). Adapters own
/// timeouts and bounded retry; callers above this trait stay retry-agnostic.
/// Coordination across processes happens only through the atomic primitives
/// exposed here: `set_nx` (set-if-absent-with-expiry) and `delete_if_equals`
/// (compare-and-delete).
#[async_trait]
pub trait KvStore: Send + Sync + Debug {
    /// Gets a raw value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Sets a raw value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Sets a value with a TTL only if the key is absent. Returns whether the
    /// value was set. Must be a single atomic operation on the store.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Deletes a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Deletes a key only if its current value equals `expected`. Returns
    /// whether a deletion happened. Used for lock release so a holder cannot
    /// delete a lock it no longer owns.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheError>;

    /// Deletes keys matching a glob pattern. Best-effort; returns the number
    /// of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError>;

    /// Adds members to the set stored at `key` (tag reverse index).
    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), CacheError>;

    /// Returns all members of the set stored at `key`.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError>;

    /// Removes members from the set stored at `key`.
    async fn set_remove(&self, key: &str, members: &[String]) -> Result<(), CacheError>;
}

//! Cache facade service
//!
//! Typed, fail-open entry point for the generic key-value tier. A store
//! outage is never an application error: reads degrade to misses, writes to
//! logged no-ops, and `get_or_set` falls back to an uncached compute. The
//! only errors this facade surfaces are the caller's own compute errors.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::domain::CacheError;
use crate::domain::cache::{CacheEnvelope, KvStore, SetOptions, namespace_of};
use crate::domain::lock::LockHandle;
use crate::infrastructure::observability::StatsCollector;
use crate::infrastructure::services::lock::DistributedLock;

const TAG_KEY_PREFIX: &str = "tag:";

/// Configuration for the cache facade
#[derive(Debug, Clone)]
pub struct CacheFacadeConfig {
    /// TTL applied when `SetOptions` does not specify one.
    pub default_ttl: Duration,
    /// Payloads above this size in bytes are gzipped before storage.
    pub compression_threshold: usize,
}

impl Default for CacheFacadeConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 60 * 60),
            compression_threshold: 1024,
        }
    }
}

impl CacheFacadeConfig {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }
}

/// Fail-open typed cache over a [`KvStore`].
#[derive(Debug, Clone)]
pub struct CacheFacade {
    store: Arc<dyn KvStore>,
    lock: DistributedLock,
    stats: Arc<StatsCollector>,
    config: CacheFacadeConfig,
}

impl CacheFacade {
    pub fn new(
        store: Arc<dyn KvStore>,
        lock: DistributedLock,
        stats: Arc<StatsCollector>,
        config: CacheFacadeConfig,
    ) -> Self {
        Self {
            store,
            lock,
            stats,
            config,
        }
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn config(&self) -> &CacheFacadeConfig {
        &self.config
    }

    fn tag_key(tag: &str) -> String {
        format!("{}{}", TAG_KEY_PREFIX, tag)
    }

    /// Typed read. Store outages, missing keys, and undecodable entries all
    /// surface as `None`.
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let started = Instant::now();
        let namespace = namespace_of(key).to_string();

        let result = self.read_entry(key).await;
        self.stats.record_latency(&namespace, started.elapsed());

        match result {
            Ok(Some(value)) => {
                self.stats.record_hit(&namespace);
                Some(value)
            }
            Ok(None) => {
                self.stats.record_miss(&namespace);
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed; treating as miss");
                self.stats.record_miss(&namespace);
                None
            }
        }
    }

    async fn read_entry<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, CacheError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        let envelope = CacheEnvelope::decode(&raw)?;
        let payload = envelope.open()?;
        let value = serde_json::from_str(&payload)
            .map_err(|e| CacheError::serialization(format!("Failed to decode payload: {}", e)))?;
        Ok(Some(value))
    }

    /// Typed write. Failures are logged and swallowed.
    pub async fn set<V: Serialize>(&self, key: &str, value: &V, options: SetOptions) {
        if let Err(e) = self.write_entry(key, value, &options).await {
            tracing::warn!(key = %key, error = %e, "Cache write failed; skipping");
        }
    }

    async fn write_entry<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        options: &SetOptions,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)
            .map_err(|e| CacheError::serialization(format!("Failed to encode payload: {}", e)))?;

        let envelope = CacheEnvelope::seal(
            &payload,
            options.tags.clone(),
            self.config.compression_threshold,
            options.no_compress,
        )?;

        // Tag memberships go in before the entry. An entry that exists but is
        // missing from its tag sets would silently survive tag invalidation;
        // a tag member whose entry never landed is a tolerated no-op.
        let member = vec![key.to_string()];
        for tag in &options.tags {
            self.store.set_add(&Self::tag_key(tag), &member).await?;
        }

        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        self.store.set(key, &envelope.encode()?, ttl).await?;

        Ok(())
    }

    /// Read-through with single-flight compute.
    ///
    /// On a miss, one caller per cache key computes under a distributed lock
    /// while concurrent callers poll the cache; whoever cannot obtain the
    /// lock or the value in time computes uncached. Compute errors propagate
    /// unchanged; cache errors never do.
    pub async fn get_or_set<V, E, F, Fut>(
        &self,
        key: &str,
        options: SetOptions,
        compute: F,
    ) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let handle = self.acquire_or_poll::<V>(key).await;
        let handle = match handle {
            PollOutcome::Cached(value) => return Ok(value),
            PollOutcome::Acquired(handle) => Some(handle),
            PollOutcome::Unlocked => None,
        };

        if let Some(handle) = &handle {
            // Another holder may have filled the entry between our first read
            // and the lock grant.
            if let Some(value) = self.get(key).await {
                if let Err(e) = self.lock.release(handle).await {
                    tracing::warn!(key = %key, error = %e, "Failed to release cache lock");
                }
                return Ok(value);
            }
        }

        let result = compute().await;

        if let Ok(value) = &result {
            self.set(key, value, options).await;
        }

        if let Some(handle) = &handle {
            if let Err(e) = self.lock.release(handle).await {
                tracing::warn!(key = %key, error = %e, "Failed to release cache lock");
            }
        }

        result
    }

    /// Try to become the computing caller; between attempts, check whether
    /// the current holder already produced the value.
    async fn acquire_or_poll<V: DeserializeOwned>(&self, key: &str) -> PollOutcome<V> {
        let attempts = self.lock.config().retry_attempts;
        let base_delay = self.lock.config().retry_delay;

        for attempt in 0..=attempts {
            match self.lock.try_acquire(key).await {
                Ok(Some(handle)) => return PollOutcome::Acquired(handle),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Lock store unavailable; computing uncached");
                    return PollOutcome::Unlocked;
                }
            }

            if attempt < attempts {
                let jitter = rand::thread_rng().gen_range(0..=base_delay.as_millis() as u64 / 2);
                tokio::time::sleep(base_delay + Duration::from_millis(jitter)).await;

                if let Some(value) = self.get(key).await {
                    return PollOutcome::Cached(value);
                }
            }
        }

        tracing::debug!(key = %key, "Lock contended through all attempts; computing uncached");
        PollOutcome::Unlocked
    }

    /// Removes an entry and unlinks it from the tag reverse index. Returns
    /// whether the entry existed; store errors degrade to `false`.
    pub async fn delete(&self, key: &str) -> bool {
        match self.remove_entry(key).await {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache delete failed; skipping");
                false
            }
        }
    }

    async fn remove_entry(&self, key: &str) -> Result<bool, CacheError> {
        if let Some(raw) = self.store.get(key).await? {
            // Entries that fail to decode still get deleted below.
            if let Ok(envelope) = CacheEnvelope::decode(&raw) {
                let member = vec![key.to_string()];
                for tag in &envelope.tags {
                    self.store.set_remove(&Self::tag_key(tag), &member).await?;
                }
            }
        }

        self.store.delete(key).await
    }

    /// Deletes all keys matching a glob pattern. Returns the number removed;
    /// store errors degrade to zero.
    pub async fn delete_pattern(&self, pattern: &str) -> usize {
        match self.store.delete_pattern(pattern).await {
            Ok(count) => {
                tracing::debug!(pattern = %pattern, count, "Deleted keys by pattern");
                count
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Pattern delete failed; skipping");
                0
            }
        }
    }

    /// Deletes every entry linked to any of the given tags, then drops the
    /// tag sets themselves. Idempotent: missing tags and already-deleted
    /// entries are no-ops.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> usize {
        let mut deleted = 0;

        for tag in tags {
            let tag_key = Self::tag_key(tag);

            let members = match self.store.set_members(&tag_key).await {
                Ok(members) => members,
                Err(e) => {
                    tracing::warn!(tag = %tag, error = %e, "Tag lookup failed; skipping tag");
                    continue;
                }
            };

            for member in &members {
                if self.delete(member).await {
                    deleted += 1;
                }
            }

            match self.store.delete(&tag_key).await {
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(tag = %tag, error = %e, "Failed to drop tag set");
                }
            }
        }

        if deleted > 0 {
            tracing::info!(tags = ?tags, deleted, "Invalidated cache entries by tag");
        }

        deleted
    }
}

enum PollOutcome<V> {
    Cached(V),
    Acquired(LockHandle),
    Unlocked,
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde::Deserialize;

    use super::*;
    use crate::domain::cache::MockKvStore;
    use crate::infrastructure::services::lock::DistributedLockConfig;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Report {
        organization_id: String,
        total_emissions: f64,
    }

    fn facade_over(store: Arc<MockKvStore>) -> CacheFacade {
        let lock = DistributedLock::new(
            Arc::clone(&store) as Arc<dyn KvStore>,
            DistributedLockConfig::default()
                .with_retry_attempts(50)
                .with_retry_delay(Duration::from_millis(2)),
        );
        CacheFacade::new(
            store,
            lock,
            Arc::new(StatsCollector::new()),
            CacheFacadeConfig::default(),
        )
    }

    fn sample_report() -> Report {
        Report {
            organization_id: "org-1".to_string(),
            total_emissions: 1234.5,
        }
    }

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let facade = facade_over(Arc::new(MockKvStore::new()));
        let report = sample_report();

        facade.set("db:report:org-1", &report, SetOptions::new()).await;
        let cached: Report = facade.get("db:report:org-1").await.unwrap();
        assert_eq!(cached, report);
    }

    #[tokio::test]
    async fn test_get_fails_open_on_store_error() {
        let facade = facade_over(Arc::new(MockKvStore::new().with_error("down")));
        let cached: Option<Report> = facade.get("db:report:org-1").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_get_fails_open_on_corrupt_entry() {
        let store = Arc::new(MockKvStore::new());
        store
            .set("db:bad", "not an envelope", Duration::from_secs(60))
            .await
            .unwrap();

        let facade = facade_over(store);
        let cached: Option<Report> = facade.get("db:bad").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_set_is_noop_on_store_error() {
        let store = Arc::new(MockKvStore::new());
        store.set_unavailable(true);

        let facade = facade_over(Arc::clone(&store));
        facade.set("db:k", &sample_report(), SetOptions::new()).await;

        store.set_unavailable(false);
        assert!(store.raw_entry("db:k").is_none());
    }

    #[tokio::test]
    async fn test_set_writes_no_entry_when_tag_linking_fails() {
        let store = Arc::new(MockKvStore::new());
        store.fail_set_add(true);

        let facade = facade_over(Arc::clone(&store));
        facade
            .set(
                "db:report:org-1",
                &sample_report(),
                SetOptions::new().with_tag("org:1"),
            )
            .await;

        // No partial write: an entry unlinked from its tags would survive
        // tag invalidation until TTL.
        assert!(store.raw_entry("db:report:org-1").is_none());

        store.fail_set_add(false);
        assert_eq!(facade.invalidate_by_tags(&["org:1".to_string()]).await, 0);
        assert!(facade.get::<Report>("db:report:org-1").await.is_none());

        // A healthy retry writes the entry and links it.
        facade
            .set(
                "db:report:org-1",
                &sample_report(),
                SetOptions::new().with_tag("org:1"),
            )
            .await;
        assert_eq!(facade.invalidate_by_tags(&["org:1".to_string()]).await, 1);
    }

    #[tokio::test]
    async fn test_large_value_stored_compressed() {
        let store = Arc::new(MockKvStore::new());
        let facade = facade_over(Arc::clone(&store));

        let big = "x".repeat(4096);
        facade.set("db:big", &big, SetOptions::new()).await;

        let raw = store.raw_entry("db:big").unwrap();
        let envelope = CacheEnvelope::decode(&raw).unwrap();
        assert!(envelope.compressed);

        let cached: String = facade.get("db:big").await.unwrap();
        assert_eq!(cached, big);
    }

    #[tokio::test]
    async fn test_get_or_set_computes_on_miss_then_hits() {
        let facade = facade_over(Arc::new(MockKvStore::new()));
        let computes = AtomicU32::new(0);
        let computes = &computes;

        for _ in 0..3 {
            let value: Result<Report, Infallible> = facade
                .get_or_set("db:report:org-1", SetOptions::new(), || async move {
                    computes.fetch_add(1, Ordering::SeqCst);
                    Ok(sample_report())
                })
                .await;
            assert_eq!(value.unwrap(), sample_report());
        }

        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_releases_lock_on_compute_error() {
        let store = Arc::new(MockKvStore::new());
        let facade = facade_over(Arc::clone(&store));

        let result: Result<Report, String> = facade
            .get_or_set("db:k", SetOptions::new(), || async {
                Err("upstream failed".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "upstream failed");
        assert!(store.raw_entry("lock:db:k").is_none());

        // Next caller can acquire immediately and succeed.
        let result: Result<Report, String> = facade
            .get_or_set("db:k", SetOptions::new(), || async { Ok(sample_report()) })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_get_or_set_at_most_one_compute_under_contention() {
        let facade = Arc::new(facade_over(Arc::new(MockKvStore::new())));
        let computes = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let facade = Arc::clone(&facade);
            let computes = Arc::clone(&computes);
            handles.push(tokio::spawn(async move {
                let value: Result<Report, Infallible> = facade
                    .get_or_set("db:hot", SetOptions::new(), || async move {
                        computes.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(sample_report())
                    })
                    .await;
                value.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), sample_report());
        }
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_computes_uncached_when_store_down() {
        let store = Arc::new(MockKvStore::new().with_error("down"));
        let facade = facade_over(store);

        let value: Result<Report, Infallible> = facade
            .get_or_set("db:k", SetOptions::new(), || async { Ok(sample_report()) })
            .await;
        assert_eq!(value.unwrap(), sample_report());
    }

    #[tokio::test]
    async fn test_delete_unlinks_tags() {
        let store = Arc::new(MockKvStore::new());
        let facade = facade_over(Arc::clone(&store));

        facade
            .set(
                "db:k",
                &sample_report(),
                SetOptions::new().with_tag("org:1"),
            )
            .await;
        assert_eq!(store.set_members("tag:org:1").await.unwrap(), vec!["db:k"]);

        assert!(facade.delete("db:k").await);
        assert!(store.set_members("tag:org:1").await.unwrap().is_empty());
        assert!(!facade.delete("db:k").await);
    }

    #[tokio::test]
    async fn test_invalidate_by_tags_is_idempotent() {
        let store = Arc::new(MockKvStore::new());
        let facade = facade_over(Arc::clone(&store));

        let tags = SetOptions::new().with_tag("org:1").with_tag("table:emissions");
        facade.set("db:a", &sample_report(), tags.clone()).await;
        facade.set("db:b", &sample_report(), tags).await;
        facade
            .set("db:other", &sample_report(), SetOptions::new().with_tag("org:2"))
            .await;

        let deleted = facade.invalidate_by_tags(&["org:1".to_string()]).await;
        assert_eq!(deleted, 2);
        assert!(facade.get::<Report>("db:a").await.is_none());
        assert!(facade.get::<Report>("db:b").await.is_none());
        assert!(facade.get::<Report>("db:other").await.is_some());

        let deleted = facade.invalidate_by_tags(&["org:1".to_string()]).await;
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let store = Arc::new(MockKvStore::new());
        let facade = facade_over(Arc::clone(&store));

        facade.set("db:org-1:a", &1u32, SetOptions::new()).await;
        facade.set("db:org-1:b", &2u32, SetOptions::new()).await;
        facade.set("db:org-2:a", &3u32, SetOptions::new()).await;

        assert_eq!(facade.delete_pattern("db:org-1:*").await, 2);
        assert!(facade.get::<u32>("db:org-2:a").await.is_some());
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let facade = facade_over(Arc::new(MockKvStore::new()));

        facade.get::<Report>("db:k").await;
        facade.set("db:k", &sample_report(), SetOptions::new()).await;
        facade.get::<Report>("db:k").await;
        facade.get::<Report>("db:k").await;

        let snapshot = facade.stats().snapshot();
        let db = &snapshot.namespaces["db"];
        assert_eq!(db.misses, 1);
        assert_eq!(db.hits, 2);
    }
}

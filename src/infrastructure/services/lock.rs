//! Distributed lock service
//!
//! SETNX-with-expiry over a [`KvStore`]. The value stored under the lock key
//! is a random owner id; release is compare-and-delete on that id, so a
//! holder that lost its lock to TTL expiry can never delete a lock another
//! process has since acquired. The TTL is the backstop for holders that crash
//! or are cancelled mid-compute.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::domain::CacheError;
use crate::domain::cache::KvStore;
use crate::domain::lock::LockHandle;

const LOCK_KEY_PREFIX: &str = "lock:";

/// Configuration for lock acquisition
#[derive(Debug, Clone)]
pub struct DistributedLockConfig {
    /// Store-side TTL reclaiming abandoned locks.
    pub ttl: Duration,
    /// Additional acquisition attempts after the first.
    pub retry_attempts: u32,
    /// Base delay between acquisition attempts, jittered.
    pub retry_delay: Duration,
}

impl Default for DistributedLockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry_attempts: 10,
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl DistributedLockConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Mutual exclusion across processes sharing a [`KvStore`].
#[derive(Debug, Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    config: DistributedLockConfig,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, config: DistributedLockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &DistributedLockConfig {
        &self.config
    }

    fn lock_key(resource: &str) -> String {
        format!("{}{}", LOCK_KEY_PREFIX, resource)
    }

    /// Single acquisition attempt. `Ok(None)` means another holder has the
    /// lock; store errors propagate so callers can decide to fail open.
    pub async fn try_acquire(&self, resource: &str) -> Result<Option<LockHandle>, CacheError> {
        let key = Self::lock_key(resource);
        let owner_id = Uuid::new_v4().to_string();

        let acquired = self.store.set_nx(&key, &owner_id, self.config.ttl).await?;
        if !acquired {
            return Ok(None);
        }

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.config.ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));

        tracing::debug!(resource = %resource, owner = %owner_id, "Acquired lock");
        Ok(Some(LockHandle::new(key, owner_id, expires_at)))
    }

    /// Acquire with bounded, jittered retries. `Ok(None)` means the lock
    /// stayed contended through every attempt.
    pub async fn acquire(&self, resource: &str) -> Result<Option<LockHandle>, CacheError> {
        for attempt in 0..=self.config.retry_attempts {
            if let Some(handle) = self.try_acquire(resource).await? {
                return Ok(Some(handle));
            }

            if attempt < self.config.retry_attempts {
                tokio::time::sleep(self.retry_pause()).await;
            }
        }

        tracing::debug!(resource = %resource, "Lock contended through all attempts");
        Ok(None)
    }

    /// Release the lock if still held by `handle`'s owner. Returns whether a
    /// release happened; `false` means the TTL already reclaimed it.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool, CacheError> {
        let released = self
            .store
            .delete_if_equals(handle.resource_key(), handle.owner_id())
            .await?;

        if !released {
            tracing::warn!(
                resource = %handle.resource_key(),
                "Lock expired before release; compute may have exceeded the lock TTL"
            );
        }

        Ok(released)
    }

    fn retry_pause(&self) -> Duration {
        let base = self.config.retry_delay;
        let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter)
    }
}

//! Distributed lock domain types

use chrono::{DateTime, Utc};

/// Ephemeral mutual-exclusion token.
///
/// Self-expiring: the store-side TTL reclaims the lock if the holder crashes
/// or is cancelled mid-compute, so a handle is never persisted beyond its
/// TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    resource_key: String,
    owner_id: String,
    expires_at: DateTime<Utc>,
}

impl LockHandle {
    pub fn new(
        resource_key: impl Into<String>,
        owner_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_key: resource_key.into(),
            owner_id: owner_id.into(),
            expires_at,
        }
    }

    /// The store key holding the lock.
    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }

    /// Identifier of the holder; release is compare-and-delete on this value.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

//! Semantic cache record types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::CacheError;

/// Tenant partition key.
///
/// Every operation on semantic cache records is scoped by this value;
/// cross-tenant leakage is a correctness violation, not a performance bug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(String);

impl OrganizationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrganizationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A tenant-scoped cached AI answer.
///
/// Immutable after creation except for the `hit_count` / `last_used_at`
/// bookkeeping bumps applied by [`record_use`](Self::record_use), and the
/// eventual deletion on invalidation or TTL expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCacheRecord {
    id: Uuid,
    organization_id: OrganizationId,
    question_text: String,
    embedding: Vec<f32>,
    response_payload: serde_json::Value,
    hit_count: u32,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SemanticCacheRecord {
    /// Creates a fresh record after a semantic miss, with `hit_count = 0` and
    /// `created_at == last_used_at == now`.
    pub fn new(
        organization_id: OrganizationId,
        question_text: impl Into<String>,
        embedding: Vec<f32>,
        response_payload: serde_json::Value,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));

        Self {
            id: Uuid::new_v4(),
            organization_id,
            question_text: question_text.into(),
            embedding,
            response_payload,
            hit_count: 0,
            created_at: now,
            last_used_at: now,
            expires_at: now + ttl,
        }
    }

    /// Rehydrates a record from storage. Fails if the stored row violates the
    /// record invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        organization_id: OrganizationId,
        question_text: String,
        embedding: Vec<f32>,
        response_payload: serde_json::Value,
        hit_count: u32,
        created_at: DateTime<Utc>,
        last_used_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, CacheError> {
        if last_used_at < created_at {
            return Err(CacheError::invariant(format!(
                "record {}: last_used_at precedes created_at",
                id
            )));
        }

        Ok(Self {
            id,
            organization_id,
            question_text,
            embedding,
            response_payload,
            hit_count,
            created_at,
            last_used_at,
            expires_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    pub fn question_text(&self) -> &str {
        &self.question_text
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn response_payload(&self) -> &serde_json::Value {
        &self.response_payload
    }

    pub fn into_response_payload(self) -> serde_json::Value {
        self.response_payload
    }

    pub fn hit_count(&self) -> u32 {
        self.hit_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Records a hit: bumps `hit_count` and refreshes `last_used_at`.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        debug_assert!(now >= self.created_at, "clock went backwards past created_at");
        self.hit_count += 1;
        if now > self.last_used_at {
            self.last_used_at = now;
        }
    }
}

/// Outcome of a semantic cache lookup, whether served from cache or computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticAnswer {
    /// The answer document.
    pub payload: serde_json::Value,
    /// Whether the answer was served from the cache.
    pub cached: bool,
    /// Hit count of the backing record after this request (0 for a miss).
    pub hit_count: u32,
    /// Similarity of the matched record, when served from cache.
    pub similarity: Option<f32>,
}

impl SemanticAnswer {
    pub fn hit(payload: serde_json::Value, hit_count: u32, similarity: f32) -> Self {
        Self {
            payload,
            cached: true,
            hit_count,
            similarity: Some(similarity),
        }
    }

    pub fn miss(payload: serde_json::Value) -> Self {
        Self {
            payload,
            cached: false,
            hit_count: 0,
            similarity: None,
        }
    }
}

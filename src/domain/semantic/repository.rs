//! Vector store trait

use std::fmt::Debug;

use async_trait::async_trait;
use uuid::Uuid;

use super::{OrganizationId, SemanticCacheRecord};
use crate::domain::CacheError;

/// Vector-capable store holding semantic cache records.
///
/// Every read path takes an `OrganizationId` and implementations MUST apply
/// the tenant filter before similarity ranking, never as a post-filter that
/// could let cross-tenant candidates into the ranking.
#[async_trait]
pub trait VectorStore: Send + Sync + Debug {
    /// Returns the `limit` nearest non-expired records for the tenant,
    /// ordered by embedding distance ascending.
    async fn nearest(
        &self,
        organization_id: &OrganizationId,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SemanticCacheRecord>, CacheError>;

    /// Persists a new record.
    async fn insert(&self, record: SemanticCacheRecord) -> Result<(), CacheError>;

    /// Bumps `hit_count` / `last_used_at` for a record and returns the
    /// updated row, or `None` if it was removed concurrently.
    async fn record_use(&self, id: Uuid) -> Result<Option<SemanticCacheRecord>, CacheError>;

    /// Removes every record belonging to the tenant. Returns the count.
    async fn delete_organization(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<usize, CacheError>;

    /// Removes expired records. Returns the count.
    async fn delete_expired(&self) -> Result<usize, CacheError>;

    /// Number of live records, optionally scoped to one tenant.
    async fn count(&self, organization_id: Option<&OrganizationId>) -> Result<usize, CacheError>;
}

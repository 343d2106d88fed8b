//! In-memory vector store using linear search
//!
//! Suitable for development, tests, and small deployments. For production
//! cache sizes, use [`PgVectorStore`](super::PgVectorStore).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::CacheError;
use crate::domain::embedding::cosine_similarity;
use crate::domain::semantic::{OrganizationId, SemanticCacheRecord, VectorStore};

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<Uuid, SemanticCacheRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn nearest(
        &self,
        organization_id: &OrganizationId,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SemanticCacheRecord>, CacheError> {
        let now = Utc::now();
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());

        // Tenant filter first, then ranking; candidates from other
        // organizations must never enter the similarity ordering.
        let mut candidates: Vec<(f32, SemanticCacheRecord)> = records
            .values()
            .filter(|r| r.organization_id() == organization_id)
            .filter(|r| !r.is_expired(now))
            .map(|r| (cosine_similarity(embedding, r.embedding()), r.clone()))
            .collect();

        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(limit);

        Ok(candidates.into_iter().map(|(_, r)| r).collect())
    }

    async fn insert(&self, record: SemanticCacheRecord) -> Result<(), CacheError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(record.id(), record);
        Ok(())
    }

    async fn record_use(&self, id: Uuid) -> Result<Option<SemanticCacheRecord>, CacheError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        Ok(records.get_mut(&id).map(|record| {
            record.record_use(Utc::now());
            record.clone()
        }))
    }

    async fn delete_organization(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<usize, CacheError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, r| r.organization_id() != organization_id);
        Ok(before - records.len())
    }

    async fn delete_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok(before - records.len())
    }

    async fn count(&self, organization_id: Option<&OrganizationId>) -> Result<usize, CacheError> {
        let now = Utc::now();
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .filter(|r| !r.is_expired(now))
            .filter(|r| organization_id.is_none_or(|org| r.organization_id() == org))
            .count())
    }
}

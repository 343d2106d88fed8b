//! Semantic query cache service
//!
//! Serves AI answers for natural-language queries by nearest-neighbor search
//! over past answers of the same tenant. A hit requires cosine similarity at
//! or above the threshold; a miss computes under a per-query distributed lock
//! and persists the fresh answer. Embedding or search failures degrade to an
//! uncached compute, so the cache can never make a request fail.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::domain::cache::{SetOptions, fingerprint, normalize_query};
use crate::domain::embedding::{EmbeddingProvider, cosine_similarity};
use crate::domain::lock::LockHandle;
use crate::domain::semantic::{OrganizationId, SemanticAnswer, SemanticCacheRecord, VectorStore};
use crate::infrastructure::observability::StatsCollector;
use crate::infrastructure::services::facade::CacheFacade;
use crate::infrastructure::services::lock::DistributedLock;

const SEMANTIC_NAMESPACE: &str = "semantic";

/// Configuration for the semantic query cache
#[derive(Debug, Clone)]
pub struct SemanticQueryCacheConfig {
    /// Minimum cosine similarity for a cached answer to count as a hit.
    /// The boundary is inclusive.
    pub similarity_threshold: f32,
    /// TTL applied to fresh records.
    pub default_ttl: Duration,
    /// Candidates fetched per nearest-neighbor search.
    pub search_limit: usize,
}

impl Default for SemanticQueryCacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            default_ttl: Duration::from_secs(24 * 60 * 60),
            search_limit: 5,
        }
    }
}

impl SemanticQueryCacheConfig {
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }
}

/// Per-request overrides for [`SemanticQueryCache::answer`]
#[derive(Debug, Clone, Default)]
pub struct AnswerOptions {
    pub similarity_threshold: Option<f32>,
    pub ttl: Option<Duration>,
}

impl AnswerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Tenant-scoped semantic cache over a [`VectorStore`] and an
/// [`EmbeddingProvider`], with a KV write-through via the [`CacheFacade`].
#[derive(Debug, Clone)]
pub struct SemanticQueryCache {
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    facade: CacheFacade,
    lock: DistributedLock,
    stats: Arc<StatsCollector>,
    config: SemanticQueryCacheConfig,
}

struct SemanticHit {
    record: SemanticCacheRecord,
    similarity: f32,
}

impl SemanticQueryCache {
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        facade: CacheFacade,
        lock: DistributedLock,
        stats: Arc<StatsCollector>,
        config: SemanticQueryCacheConfig,
    ) -> Self {
        Self {
            vectors,
            embedder,
            facade,
            lock,
            stats,
            config,
        }
    }

    pub fn config(&self) -> &SemanticQueryCacheConfig {
        &self.config
    }

    /// Answers a query from the semantic cache, computing and persisting on a
    /// miss. Compute errors propagate unchanged; every cache-side failure
    /// degrades to an uncached compute.
    pub async fn answer<E, F, Fut>(
        &self,
        organization_id: &OrganizationId,
        query: &str,
        options: AnswerOptions,
        compute: F,
    ) -> Result<SemanticAnswer, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, E>>,
    {
        let started = Instant::now();
        let normalized = normalize_query(query);
        let threshold = options
            .similarity_threshold
            .unwrap_or(self.config.similarity_threshold);

        if normalized.is_empty() {
            tracing::debug!(organization_id = %organization_id, "Empty query; bypassing semantic cache");
            return compute().await.map(SemanticAnswer::miss);
        }

        let embedding = match self.embedder.embed(&normalized).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    provider = self.embedder.provider_name(),
                    error = %e,
                    "Embedding failed; computing uncached"
                );
                self.stats.record_miss(SEMANTIC_NAMESPACE);
                return compute().await.map(SemanticAnswer::miss);
            }
        };

        if let Some(hit) = self.lookup(organization_id, &embedding, threshold).await {
            self.stats.record_hit(SEMANTIC_NAMESPACE);
            self.stats
                .record_latency(SEMANTIC_NAMESPACE, started.elapsed());
            return Ok(self.serve_hit(hit).await);
        }

        let resource = format!(
            "semantic:{}",
            fingerprint(organization_id.as_str(), &normalized)
        );

        let handle = match self
            .acquire_or_poll(organization_id, &embedding, threshold, &resource)
            .await
        {
            PollOutcome::Hit(hit) => {
                self.stats.record_hit(SEMANTIC_NAMESPACE);
                self.stats
                    .record_latency(SEMANTIC_NAMESPACE, started.elapsed());
                return Ok(self.serve_hit(hit).await);
            }
            PollOutcome::Acquired(handle) => Some(handle),
            PollOutcome::Unlocked => None,
        };

        if handle.is_some() {
            // The previous holder may have persisted this answer while we
            // waited for the lock.
            if let Some(hit) = self.lookup(organization_id, &embedding, threshold).await {
                self.release(handle.as_ref(), &resource).await;
                self.stats.record_hit(SEMANTIC_NAMESPACE);
                self.stats
                    .record_latency(SEMANTIC_NAMESPACE, started.elapsed());
                return Ok(self.serve_hit(hit).await);
            }
        }

        self.stats.record_miss(SEMANTIC_NAMESPACE);

        let payload = match compute().await {
            Ok(payload) => payload,
            Err(e) => {
                self.release(handle.as_ref(), &resource).await;
                return Err(e);
            }
        };

        self.persist(
            organization_id,
            &normalized,
            embedding,
            &payload,
            options.ttl.unwrap_or(self.config.default_ttl),
        )
        .await;

        self.release(handle.as_ref(), &resource).await;
        self.stats
            .record_latency(SEMANTIC_NAMESPACE, started.elapsed());

        Ok(SemanticAnswer::miss(payload))
    }

    /// Nearest-neighbor lookup. Search failures and below-threshold
    /// candidates both surface as `None`.
    async fn lookup(
        &self,
        organization_id: &OrganizationId,
        embedding: &[f32],
        threshold: f32,
    ) -> Option<SemanticHit> {
        let candidates = match self
            .vectors
            .nearest(organization_id, embedding, self.config.search_limit)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    error = %e,
                    "Similarity search failed; treating as miss"
                );
                return None;
            }
        };

        for record in candidates {
            if record.organization_id() != organization_id {
                // The store already filters by tenant; a mismatch here means
                // the adapter is broken and must not be served.
                debug_assert!(false, "vector store returned a cross-tenant record");
                tracing::error!(
                    organization_id = %organization_id,
                    record_id = %record.id(),
                    "Cross-tenant record in search results; skipping"
                );
                continue;
            }

            let similarity = cosine_similarity(embedding, record.embedding());
            if similarity >= threshold {
                return Some(SemanticHit { record, similarity });
            }
        }

        None
    }

    /// Bumps the matched record's bookkeeping and builds the hit answer.
    async fn serve_hit(&self, hit: SemanticHit) -> SemanticAnswer {
        let hit_count = match self.vectors.record_use(hit.record.id()).await {
            Ok(Some(updated)) => updated.hit_count(),
            Ok(None) => hit.record.hit_count() + 1,
            Err(e) => {
                tracing::warn!(
                    record_id = %hit.record.id(),
                    error = %e,
                    "Failed to record semantic cache use"
                );
                hit.record.hit_count() + 1
            }
        };

        tracing::debug!(
            record_id = %hit.record.id(),
            similarity = hit.similarity,
            hit_count,
            "Semantic cache hit"
        );

        SemanticAnswer::hit(hit.record.into_response_payload(), hit_count, hit.similarity)
    }

    async fn acquire_or_poll(
        &self,
        organization_id: &OrganizationId,
        embedding: &[f32],
        threshold: f32,
        resource: &str,
    ) -> PollOutcome {
        let attempts = self.lock.config().retry_attempts;
        let base_delay = self.lock.config().retry_delay;

        for attempt in 0..=attempts {
            match self.lock.try_acquire(resource).await {
                Ok(Some(handle)) => return PollOutcome::Acquired(handle),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        resource = %resource,
                        error = %e,
                        "Lock store unavailable; computing uncached"
                    );
                    return PollOutcome::Unlocked;
                }
            }

            if attempt < attempts {
                let jitter = rand::thread_rng().gen_range(0..=base_delay.as_millis() as u64 / 2);
                tokio::time::sleep(base_delay + Duration::from_millis(jitter)).await;

                if let Some(hit) = self.lookup(organization_id, embedding, threshold).await {
                    return PollOutcome::Hit(hit);
                }
            }
        }

        tracing::debug!(resource = %resource, "Lock contended through all attempts; computing uncached");
        PollOutcome::Unlocked
    }

    /// Persists a fresh answer to the vector store and writes it through to
    /// the KV tier. Both writes are best-effort.
    async fn persist(
        &self,
        organization_id: &OrganizationId,
        normalized_query: &str,
        embedding: Vec<f32>,
        payload: &serde_json::Value,
        ttl: Duration,
    ) {
        let record = SemanticCacheRecord::new(
            organization_id.clone(),
            normalized_query,
            embedding,
            payload.clone(),
            ttl,
        );

        if let Err(e) = self.vectors.insert(record).await {
            tracing::warn!(
                organization_id = %organization_id,
                error = %e,
                "Failed to persist semantic cache record"
            );
        }

        let kv_key = format!(
            "semantic:{}:{}",
            organization_id,
            fingerprint(organization_id.as_str(), normalized_query)
        );
        self.facade
            .set(
                &kv_key,
                payload,
                SetOptions::new()
                    .with_ttl(ttl)
                    .with_tag(format!("org:{}", organization_id))
                    .with_tag(SEMANTIC_NAMESPACE),
            )
            .await;
    }

    async fn release(&self, handle: Option<&LockHandle>, resource: &str) {
        if let Some(handle) = handle {
            if let Err(e) = self.lock.release(handle).await {
                tracing::warn!(resource = %resource, error = %e, "Failed to release semantic lock");
            }
        }
    }

    /// Drops every cached answer of one tenant, in both tiers. Returns the
    /// number of vector records removed.
    pub async fn clear_organization(&self, organization_id: &OrganizationId) -> usize {
        let removed = match self.vectors.delete_organization(organization_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    error = %e,
                    "Failed to clear semantic records"
                );
                0
            }
        };

        self.facade
            .delete_pattern(&format!("semantic:{}:*", organization_id))
            .await;

        tracing::info!(organization_id = %organization_id, removed, "Cleared semantic cache");
        removed
    }

    /// Removes expired vector records. The KV tier expires on its own TTLs.
    pub async fn purge_expired(&self) -> usize {
        match self.vectors.delete_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(removed, "Purged expired semantic cache records");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to purge expired semantic records");
                0
            }
        }
    }
}

enum PollOutcome {
    Hit(SemanticHit),
    Acquired(LockHandle),
    Unlocked,
}

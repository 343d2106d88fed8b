//! Multi-tier caching for multi-tenant SaaS backends.
//!
//! Two cooperating tiers:
//!
//! - a generic, fail-open key-value cache ([`CacheFacade`]) over Redis, with
//!   typed values, transparent compression, tag-based invalidation, and
//!   single-flight `get_or_set`;
//! - a semantic query cache ([`SemanticQueryCache`]) that answers
//!   natural-language queries by tenant-scoped nearest-neighbor search over
//!   past answers in pgvector.
//!
//! A [`WriteInvalidationCoordinator`] keeps both tiers honest when the source
//! of truth changes. All cache failures fail open: the backing stores going
//! down degrades performance, never correctness.

pub mod config;
pub mod domain;
pub mod infrastructure;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::AppConfig;
pub use crate::domain::CacheError;
pub use crate::domain::cache::{KvStore, SetOptions};
pub use crate::domain::embedding::EmbeddingProvider;
pub use crate::domain::semantic::{OrganizationId, SemanticAnswer, VectorStore};
pub use crate::infrastructure::kv::{InMemoryKvStore, RedisKvStore, RedisKvStoreConfig};
pub use crate::infrastructure::observability::{StatsCollector, StatsSnapshot};
pub use crate::infrastructure::services::{
    AnswerOptions, CacheFacade, CacheFacadeConfig, DistributedLock, DistributedLockConfig,
    InvalidationReport, InvalidationRule, SemanticQueryCache, SemanticQueryCacheConfig,
    WriteInvalidationCoordinator, WriteScope,
};
pub use crate::infrastructure::vector::{InMemoryVectorStore, PgVectorStore, PgVectorStoreConfig};

use crate::infrastructure::embedding::{OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};
use crate::infrastructure::kv::RetryPolicy;

/// Fully wired cache stack built from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct CacheRuntime {
    facade: CacheFacade,
    semantic: SemanticQueryCache,
    invalidation: WriteInvalidationCoordinator,
    stats: Arc<StatsCollector>,
}

impl CacheRuntime {
    /// Connects to Redis, PostgreSQL, and the embedding provider, and wires
    /// the services together.
    pub async fn connect(config: &AppConfig) -> Result<Self, CacheError> {
        let embedder = OpenAiEmbeddingProvider::new(embedding_config(config)?)?;
        let dimensions = embedder.dimensions() as u32;

        let kv: Arc<dyn KvStore> = Arc::new(
            RedisKvStore::connect(
                RedisKvStoreConfig::new(&config.redis.url)
                    .with_key_prefix(&config.redis.key_prefix)
                    .with_op_timeout(Duration::from_millis(config.redis.op_timeout_ms))
                    .with_retry(RetryPolicy::default()),
            )
            .await?,
        );

        let vectors = PgVectorStore::connect(
            PgVectorStoreConfig::new(&config.postgres.url, dimensions)
                .with_table_name(&config.postgres.table_name)
                .with_max_connections(config.postgres.max_connections)
                .with_search_timeout(Duration::from_millis(config.postgres.search_timeout_ms)),
        )
        .await?;
        vectors.ensure_table().await?;

        Ok(Self::assemble(
            kv,
            Arc::new(vectors),
            Arc::new(embedder),
            config,
        ))
    }

    /// Wires the services over caller-provided stores. Used for in-memory
    /// setups and tests.
    pub fn assemble(
        kv: Arc<dyn KvStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &AppConfig,
    ) -> Self {
        let stats = Arc::new(StatsCollector::new());

        let lock_config = DistributedLockConfig::default()
            .with_ttl(Duration::from_secs(config.lock.ttl_secs))
            .with_retry_attempts(config.lock.retry_attempts)
            .with_retry_delay(Duration::from_millis(config.lock.retry_delay_ms));

        let facade = CacheFacade::new(
            Arc::clone(&kv),
            DistributedLock::new(Arc::clone(&kv), lock_config.clone()),
            Arc::clone(&stats),
            CacheFacadeConfig::default()
                .with_default_ttl(Duration::from_secs(config.cache.default_ttl_secs))
                .with_compression_threshold(config.cache.compression_threshold_bytes),
        );

        let semantic = SemanticQueryCache::new(
            vectors,
            embedder,
            facade.clone(),
            DistributedLock::new(kv, lock_config),
            Arc::clone(&stats),
            SemanticQueryCacheConfig::default()
                .with_similarity_threshold(config.semantic.similarity_threshold)
                .with_default_ttl(Duration::from_secs(config.semantic.default_ttl_secs))
                .with_search_limit(config.semantic.search_limit),
        );

        let invalidation = WriteInvalidationCoordinator::new(
            facade.clone(),
            Some(semantic.clone()),
            invalidation_rules(config),
        );

        Self {
            facade,
            semantic,
            invalidation,
            stats,
        }
    }

    pub fn facade(&self) -> &CacheFacade {
        &self.facade
    }

    pub fn semantic(&self) -> &SemanticQueryCache {
        &self.semantic
    }

    pub fn invalidation(&self) -> &WriteInvalidationCoordinator {
        &self.invalidation
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

fn embedding_config(config: &AppConfig) -> Result<OpenAiEmbeddingConfig, CacheError> {
    if config.embedding.api_key.is_empty() {
        return Err(CacheError::configuration("Embedding API key is not set"));
    }

    let mut embedding = OpenAiEmbeddingConfig::new(&config.embedding.api_key)
        .with_model(&config.embedding.model);
    if let Some(base_url) = &config.embedding.base_url {
        embedding = embedding.with_base_url(base_url);
    }
    Ok(embedding)
}

fn invalidation_rules(config: &AppConfig) -> HashMap<String, InvalidationRule> {
    config
        .invalidation
        .iter()
        .map(|(table, rule)| {
            (
                table.clone(),
                InvalidationRule {
                    tags: rule.tags.clone(),
                    org_scoped: rule.org_scoped,
                    clear_semantic: rule.clear_semantic,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use crate::config::InvalidationRuleConfig;
    use crate::domain::embedding::MockEmbeddingProvider;

    fn runtime() -> CacheRuntime {
        let mut config = AppConfig::default();
        config.invalidation.insert(
            "emissions".to_string(),
            InvalidationRuleConfig {
                tags: vec!["dashboard".to_string()],
                org_scoped: true,
                clear_semantic: true,
            },
        );

        CacheRuntime::assemble(
            Arc::new(InMemoryKvStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(MockEmbeddingProvider::new(4)),
            &config,
        )
    }

    #[tokio::test]
    async fn test_assembled_runtime_round_trip() {
        let runtime = runtime();
        let org = OrganizationId::new("org-1");

        let answer: Result<SemanticAnswer, Infallible> = runtime
            .semantic()
            .answer(&org, "what are my emissions?", AnswerOptions::new(), || async {
                Ok(serde_json::json!({"answer": 42}))
            })
            .await;
        assert!(!answer.unwrap().cached);

        let answer: Result<SemanticAnswer, Infallible> = runtime
            .semantic()
            .answer(&org, "what are my emissions?", AnswerOptions::new(), || async {
                Ok(serde_json::json!({"answer": 43}))
            })
            .await;
        let answer = answer.unwrap();
        assert!(answer.cached);
        assert_eq!(answer.payload, serde_json::json!({"answer": 42}));

        let report = runtime
            .invalidation()
            .on_write("emissions", &WriteScope::Organization(org.clone()))
            .await;
        assert_eq!(report.semantic_records_cleared, 1);

        let snapshot = runtime.stats();
        assert!(snapshot.namespaces.contains_key("semantic"));
    }

    #[test]
    fn test_embedding_config_requires_api_key() {
        let config = AppConfig::default();
        assert!(matches!(
            embedding_config(&config),
            Err(CacheError::Configuration { .. })
        ));
    }
}

//! Write invalidation coordinator
//!
//! Maps source-of-truth table writes to the cache tags they stale out.
//! Rules are static configuration; a write to a table with no rule is logged
//! and otherwise ignored so new tables can ship before their cache rules do.

use std::collections::HashMap;

use crate::domain::semantic::OrganizationId;
use crate::infrastructure::services::facade::CacheFacade;
use crate::infrastructure::services::semantic_cache::SemanticQueryCache;

/// What a write touched: one tenant's rows, or shared reference data.
#[derive(Debug, Clone)]
pub enum WriteScope {
    Organization(OrganizationId),
    Global,
}

/// Invalidation behavior for writes to one table
#[derive(Debug, Clone, Default)]
pub struct InvalidationRule {
    /// Extra tags invalidated besides the implicit `table:<name>` tag.
    pub tags: Vec<String>,
    /// Whether to also invalidate the writing tenant's `org:<id>` tag.
    pub org_scoped: bool,
    /// Whether the writing tenant's semantic answers are stale after this
    /// write.
    pub clear_semantic: bool,
}

impl InvalidationRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn org_scoped(mut self) -> Self {
        self.org_scoped = true;
        self
    }

    pub fn clearing_semantic(mut self) -> Self {
        self.clear_semantic = true;
        self
    }
}

/// Result of one invalidation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub entries_deleted: usize,
    pub semantic_records_cleared: usize,
}

/// Translates table writes into tag invalidations and semantic clears.
#[derive(Debug, Clone)]
pub struct WriteInvalidationCoordinator {
    facade: CacheFacade,
    semantic: Option<SemanticQueryCache>,
    rules: HashMap<String, InvalidationRule>,
}

impl WriteInvalidationCoordinator {
    pub fn new(
        facade: CacheFacade,
        semantic: Option<SemanticQueryCache>,
        rules: HashMap<String, InvalidationRule>,
    ) -> Self {
        Self {
            facade,
            semantic,
            rules,
        }
    }

    pub fn has_rule(&self, table: &str) -> bool {
        self.rules.contains_key(table)
    }

    pub fn semantic(&self) -> Option<&SemanticQueryCache> {
        self.semantic.as_ref()
    }

    /// Invalidates everything a write to `table` made stale.
    pub async fn on_write(&self, table: &str, scope: &WriteScope) -> InvalidationReport {
        let Some(rule) = self.rules.get(table) else {
            tracing::warn!(table = %table, "Write to table without invalidation rule; nothing invalidated");
            return InvalidationReport::default();
        };

        let mut tags = vec![format!("table:{}", table)];
        tags.extend(rule.tags.iter().cloned());

        let organization_id = match scope {
            WriteScope::Organization(id) => Some(id),
            WriteScope::Global => None,
        };

        if rule.org_scoped {
            if let Some(id) = organization_id {
                tags.push(format!("org:{}", id));
            }
        }

        let entries_deleted = self.facade.invalidate_by_tags(&tags).await;

        let mut semantic_records_cleared = 0;
        if rule.clear_semantic {
            match (&self.semantic, organization_id) {
                (Some(semantic), Some(id)) => {
                    semantic_records_cleared = semantic.clear_organization(id).await;
                }
                (Some(_), None) => {
                    tracing::warn!(
                        table = %table,
                        "Global write on a semantic-clearing rule; semantic cache left untouched"
                    );
                }
                (None, _) => {}
            }
        }

        tracing::debug!(
            table = %table,
            entries_deleted,
            semantic_records_cleared,
            "Processed write invalidation"
        );

        InvalidationReport {
            entries_deleted,
            semantic_records_cleared,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::domain::cache::{KvStore, MockKvStore, SetOptions};
    use crate::domain::embedding::MockEmbeddingProvider;
    use crate::domain::semantic::{SemanticAnswer, VectorStore};
    use crate::infrastructure::observability::StatsCollector;
    use crate::infrastructure::services::facade::CacheFacadeConfig;
    use crate::infrastructure::services::lock::{DistributedLock, DistributedLockConfig};
    use crate::infrastructure::services::semantic_cache::{
        AnswerOptions, SemanticQueryCacheConfig,
    };
    use crate::infrastructure::vector::InMemoryVectorStore;

    fn rules() -> HashMap<String, InvalidationRule> {
        HashMap::from([
            (
                "emissions".to_string(),
                InvalidationRule::new()
                    .with_tag("dashboard")
                    .org_scoped()
                    .clearing_semantic(),
            ),
            (
                "emission_factors".to_string(),
                InvalidationRule::new().with_tag("reference-data"),
            ),
        ])
    }

    struct Harness {
        coordinator: WriteInvalidationCoordinator,
        facade: CacheFacade,
        vectors: Arc<InMemoryVectorStore>,
    }

    fn harness() -> Harness {
        let kv = Arc::new(MockKvStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let stats = Arc::new(StatsCollector::new());
        let lock_config = DistributedLockConfig::default()
            .with_retry_attempts(5)
            .with_retry_delay(Duration::from_millis(1));

        let facade = CacheFacade::new(
            Arc::clone(&kv) as Arc<dyn KvStore>,
            DistributedLock::new(Arc::clone(&kv) as Arc<dyn KvStore>, lock_config.clone()),
            Arc::clone(&stats),
            CacheFacadeConfig::default(),
        );

        let semantic = SemanticQueryCache::new(
            Arc::clone(&vectors) as Arc<dyn VectorStore>,
            Arc::new(MockEmbeddingProvider::new(4)),
            facade.clone(),
            DistributedLock::new(kv as Arc<dyn KvStore>, lock_config),
            stats,
            SemanticQueryCacheConfig::default(),
        );

        let coordinator =
            WriteInvalidationCoordinator::new(facade.clone(), Some(semantic), rules());

        Harness {
            coordinator,
            facade,
            vectors,
        }
    }

    fn org(id: &str) -> OrganizationId {
        OrganizationId::new(id)
    }

    #[tokio::test]
    async fn test_write_invalidates_table_and_org_tags() {
        let harness = harness();

        harness
            .facade
            .set(
                "db:emissions:org-1:2025",
                &1u32,
                SetOptions::new().with_tag("table:emissions").with_tag("org:org-1"),
            )
            .await;
        harness
            .facade
            .set(
                "db:report:org-1",
                &2u32,
                SetOptions::new().with_tag("org:org-1"),
            )
            .await;
        harness
            .facade
            .set(
                "db:emissions:org-2:2025",
                &3u32,
                SetOptions::new().with_tag("table:emissions").with_tag("org:org-2"),
            )
            .await;

        let report = harness
            .coordinator
            .on_write("emissions", &WriteScope::Organization(org("org-1")))
            .await;

        // table:emissions catches both tenants' rows, org:org-1 catches the
        // report. Exactly three entries total.
        assert_eq!(report.entries_deleted, 3);
        assert!(harness.facade.get::<u32>("db:emissions:org-1:2025").await.is_none());
        assert!(harness.facade.get::<u32>("db:report:org-1").await.is_none());
        assert!(harness.facade.get::<u32>("db:emissions:org-2:2025").await.is_none());
    }

    #[tokio::test]
    async fn test_global_write_skips_org_tag() {
        let harness = harness();

        harness
            .facade
            .set(
                "db:factors:grid",
                &1u32,
                SetOptions::new().with_tag("reference-data"),
            )
            .await;
        harness
            .facade
            .set("db:report:org-1", &2u32, SetOptions::new().with_tag("org:org-1"))
            .await;

        let report = harness
            .coordinator
            .on_write("emission_factors", &WriteScope::Global)
            .await;

        assert_eq!(report.entries_deleted, 1);
        assert!(harness.facade.get::<u32>("db:report:org-1").await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_table_is_a_noop() {
        let harness = harness();

        harness
            .facade
            .set("db:k", &1u32, SetOptions::new().with_tag("org:org-1"))
            .await;

        let report = harness
            .coordinator
            .on_write("brand_new_table", &WriteScope::Organization(org("org-1")))
            .await;

        assert_eq!(report, InvalidationReport::default());
        assert!(harness.facade.get::<u32>("db:k").await.is_some());
    }

    #[tokio::test]
    async fn test_semantic_clearing_rule() {
        let harness = harness();

        let answer: Result<SemanticAnswer, Infallible> = harness
            .coordinator
            .semantic()
            .unwrap()
            .answer(
                &org("org-1"),
                "what are my emissions?",
                AnswerOptions::new(),
                || async { Ok(serde_json::json!({"answer": 1})) },
            )
            .await;
        assert!(!answer.unwrap().cached);
        assert_eq!(harness.vectors.count(None).await.unwrap(), 1);

        let report = harness
            .coordinator
            .on_write("emissions", &WriteScope::Organization(org("org-1")))
            .await;

        assert_eq!(report.semantic_records_cleared, 1);
        assert_eq!(harness.vectors.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rule_without_semantic_clearing_keeps_records() {
        let harness = harness();

        let answer: Result<SemanticAnswer, Infallible> = harness
            .coordinator
            .semantic()
            .unwrap()
            .answer(
                &org("org-1"),
                "what are my emissions?",
                AnswerOptions::new(),
                || async { Ok(serde_json::json!({"answer": 1})) },
            )
            .await;
        assert!(!answer.unwrap().cached);

        harness
            .coordinator
            .on_write("emission_factors", &WriteScope::Global)
            .await;

        assert_eq!(harness.vectors.count(None).await.unwrap(), 1);
    }
}

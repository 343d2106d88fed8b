//! pgvector-backed vector store

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use uuid::Uuid;

use crate::domain::CacheError;
use crate::domain::semantic::{OrganizationId, SemanticCacheRecord, VectorStore};

/// Configuration for the pgvector store
#[derive(Debug, Clone)]
pub struct PgVectorStoreConfig {
    /// Database connection URL
    pub url: String,
    /// Embedding dimensions
    pub dimensions: u32,
    /// Table name for semantic cache records
    pub table_name: String,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Per-query timeout for similarity search
    pub search_timeout: Duration,
}

impl Default for PgVectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/tiercache".to_string(),
            dimensions: 1536,
            table_name: "semantic_cache_records".to_string(),
            max_connections: 10,
            search_timeout: Duration::from_millis(500),
        }
    }
}

impl PgVectorStoreConfig {
    pub fn new(url: impl Into<String>, dimensions: u32) -> Self {
        Self {
            url: url.into(),
            dimensions,
            ..Default::default()
        }
    }

    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }
}

/// PostgreSQL + pgvector [`VectorStore`].
///
/// Nearest-neighbor queries order by cosine distance (`<=>`) and carry the
/// `organization_id` predicate inside the SQL, so the tenant filter is applied
/// by the database before ranking.
pub struct PgVectorStore {
    pool: PgPool,
    config: PgVectorStoreConfig,
}

impl Debug for PgVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgVectorStore")
            .field("table_name", &self.config.table_name)
            .field("dimensions", &self.config.dimensions)
            .finish()
    }
}

impl PgVectorStore {
    pub fn new(pool: PgPool, config: PgVectorStoreConfig) -> Self {
        Self { pool, config }
    }

    pub async fn connect(config: PgVectorStoreConfig) -> Result<Self, CacheError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.url)
            .await
            .map_err(|e| {
                CacheError::store_unavailable(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensures the pgvector extension, table, and indexes exist.
    pub async fn ensure_table(&self) -> Result<(), CacheError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                CacheError::store_unavailable(format!("Failed to create vector extension: {}", e))
            })?;

        let table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY,
                organization_id VARCHAR(255) NOT NULL,
                question_text TEXT NOT NULL,
                embedding vector({}) NOT NULL,
                response_payload JSONB NOT NULL,
                hit_count BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                last_used_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
            self.config.table_name, self.config.dimensions
        );

        sqlx::query(&table)
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::store_unavailable(format!("Failed to create table: {}", e)))?;

        let org_index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_org ON {} (organization_id)",
            self.config.table_name, self.config.table_name
        );
        sqlx::query(&org_index)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                CacheError::store_unavailable(format!("Failed to create org index: {}", e))
            })?;

        // IVFFlat needs data to build; ignore failures on an empty table
        let vector_index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_embedding ON {} USING ivfflat (embedding vector_cosine_ops)",
            self.config.table_name, self.config.table_name
        );
        let _ = sqlx::query(&vector_index).execute(&self.pool).await;

        Ok(())
    }

    fn row_to_record(row: &PgRow) -> Result<SemanticCacheRecord, CacheError> {
        let embedding_str: String = row.get("embedding");
        let embedding = parse_pgvector(&embedding_str)?;
        let hit_count: i64 = row.get("hit_count");

        SemanticCacheRecord::from_parts(
            row.get("id"),
            OrganizationId::new(row.get::<String, _>("organization_id")),
            row.get("question_text"),
            embedding,
            row.get("response_payload"),
            hit_count.max(0) as u32,
            row.get("created_at"),
            row.get("last_used_at"),
            row.get("expires_at"),
        )
    }
}

/// Serializes an embedding as a pgvector literal: `[v1,v2,...]`.
fn embedding_to_pgvector(embedding: &[f32]) -> String {
    let values: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", values.join(","))
}

/// Parses a pgvector text representation back into a vector.
fn parse_pgvector(text: &str) -> Result<Vec<f32>, CacheError> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| {
            CacheError::store_unavailable(format!("Malformed pgvector value: {}", text))
        })?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|v| {
            v.trim().parse::<f32>().map_err(|e| {
                CacheError::store_unavailable(format!("Malformed pgvector component: {}", e))
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn nearest(
        &self,
        organization_id: &OrganizationId,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SemanticCacheRecord>, CacheError> {
        let embedding_str = embedding_to_pgvector(embedding);

        // organization_id is a bound parameter in the WHERE clause: the
        // tenant filter runs before distance ordering, never after it.
        let query = format!(
            r#"
            SELECT
                id, organization_id, question_text,
                embedding::text AS embedding,
                response_payload, hit_count,
                created_at, last_used_at, expires_at
            FROM {}
            WHERE organization_id = $1
              AND expires_at > NOW()
            ORDER BY embedding <=> $2::vector
            LIMIT $3
            "#,
            self.config.table_name
        );

        let rows = tokio::time::timeout(
            self.config.search_timeout,
            sqlx::query(&query)
                .bind(organization_id.as_str())
                .bind(&embedding_str)
                .bind(limit as i64)
                .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| CacheError::timeout("vector_search"))?
        .map_err(|e| CacheError::store_unavailable(format!("Similarity search failed: {}", e)))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn insert(&self, record: SemanticCacheRecord) -> Result<(), CacheError> {
        let embedding_str = embedding_to_pgvector(record.embedding());
        let query = format!(
            r#"
            INSERT INTO {} (
                id, organization_id, question_text, embedding,
                response_payload, hit_count, created_at, last_used_at, expires_at
            )
            VALUES ($1, $2, $3, $4::vector, $5, $6, $7, $8, $9)
            "#,
            self.config.table_name
        );

        sqlx::query(&query)
            .bind(record.id())
            .bind(record.organization_id().as_str())
            .bind(record.question_text())
            .bind(&embedding_str)
            .bind(record.response_payload())
            .bind(record.hit_count() as i64)
            .bind(record.created_at())
            .bind(record.last_used_at())
            .bind(record.expires_at())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                CacheError::store_unavailable(format!("Failed to insert record: {}", e))
            })?;

        Ok(())
    }

    async fn record_use(&self, id: Uuid) -> Result<Option<SemanticCacheRecord>, CacheError> {
        let query = format!(
            r#"
            UPDATE {}
            SET hit_count = hit_count + 1, last_used_at = NOW()
            WHERE id = $1
            RETURNING
                id, organization_id, question_text,
                embedding::text AS embedding,
                response_payload, hit_count,
                created_at, last_used_at, expires_at
            "#,
            self.config.table_name
        );

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                CacheError::store_unavailable(format!("Failed to record hit: {}", e))
            })?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn delete_organization(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<usize, CacheError> {
        let query = format!("DELETE FROM {} WHERE organization_id = $1", self.config.table_name);

        let result = sqlx::query(&query)
            .bind(organization_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                CacheError::store_unavailable(format!("Failed to delete tenant records: {}", e))
            })?;

        Ok(result.rows_affected() as usize)
    }

    async fn delete_expired(&self) -> Result<usize, CacheError> {
        let query = format!("DELETE FROM {} WHERE expires_at <= NOW()", self.config.table_name);

        let result = sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                CacheError::store_unavailable(format!("Failed to delete expired records: {}", e))
            })?;

        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, organization_id: Option<&OrganizationId>) -> Result<usize, CacheError> {
        let (query, bind_org) = match organization_id {
            Some(_) => (
                format!(
                    "SELECT COUNT(*) AS n FROM {} WHERE organization_id = $1 AND expires_at > NOW()",
                    self.config.table_name
                ),
                true,
            ),
            None => (
                format!(
                    "SELECT COUNT(*) AS n FROM {} WHERE expires_at > NOW()",
                    self.config.table_name
                ),
                false,
            ),
        };

        let mut q = sqlx::query(&query);
        if bind_org {
            if let Some(org) = organization_id {
                q = q.bind(org.as_str());
            }
        }

        let row = q
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CacheError::store_unavailable(format!("Failed to count records: {}", e)))?;

        let n: i64 = row.get("n");
        Ok(n.max(0) as usize)
    }
}

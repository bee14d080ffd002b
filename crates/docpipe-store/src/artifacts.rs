use docpipe_types::{EmbeddingRecord, SummaryRecord};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::error::StoreError;

/// Derived-artifact storage: LLM summaries and embedding chunks.
pub struct ArtifactStore {
    pool: PgPool,
}

impl ArtifactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The existing summary's content hash for `(document_uuid, model)`, if
    /// any — used by the LLM-summary step's pre-check.
    pub async fn existing_summary_hash(
        &self,
        document_uuid: Uuid,
        model: &str,
    ) -> Result<Option<String>, StoreError> {
        let hash = sqlx::query_scalar(
            "SELECT content_hash FROM summaries WHERE document_uuid = $1 AND model = $2",
        )
        .bind(document_uuid)
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    #[instrument(skip(self, summary))]
    pub async fn save_summary(&self, summary: &SummaryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO summaries (
                document_uuid, content_hash, model, provider, style, executive_summary,
                key_points, topics, tags, confidence, tokens, duration_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (document_uuid, model)
            DO UPDATE SET content_hash = EXCLUDED.content_hash,
                          provider = EXCLUDED.provider,
                          style = EXCLUDED.style,
                          executive_summary = EXCLUDED.executive_summary,
                          key_points = EXCLUDED.key_points,
                          topics = EXCLUDED.topics,
                          tags = EXCLUDED.tags,
                          confidence = EXCLUDED.confidence,
                          tokens = EXCLUDED.tokens,
                          duration_ms = EXCLUDED.duration_ms,
                          created_at = EXCLUDED.created_at
            "#,
        )
        .bind(summary.document_uuid)
        .bind(&summary.content_hash)
        .bind(&summary.model)
        .bind(&summary.provider)
        .bind(&summary.style)
        .bind(&summary.executive_summary)
        .bind(&summary.key_points)
        .bind(&summary.topics)
        .bind(&summary.tags)
        .bind(summary.confidence)
        .bind(summary.tokens as i64)
        .bind(summary.duration_ms as i64)
        .bind(summary.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The existing content hash for `(document_uuid, model, chunk_index)`,
    /// if any — used by the embeddings step's pre-check. `chunk_index =
    /// None` addresses the non-chunked row.
    pub async fn existing_embedding_hash(
        &self,
        document_uuid: Uuid,
        model: &str,
        chunk_index: Option<i32>,
    ) -> Result<Option<String>, StoreError> {
        let hash = sqlx::query_scalar(
            r#"
            SELECT content_hash FROM embeddings
            WHERE document_uuid = $1 AND model = $2 AND chunk_index IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(document_uuid)
        .bind(model)
        .bind(chunk_index)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    /// Persist one row per chunk. Callers pass chunks in `chunk_index`
    /// order; this writes them in a single transaction so a batch embedding
    /// call either fully lands or fully doesn't.
    #[instrument(skip(self, records))]
    pub async fn save_embeddings(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            let vector_json = serde_json::to_value(&record.vector)?;
            sqlx::query(
                r#"
                INSERT INTO embeddings (document_uuid, content_hash, model, chunk_index, chunk_text, dimensions, vector, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (document_uuid, model, (COALESCE(chunk_index, -1)))
                DO UPDATE SET content_hash = EXCLUDED.content_hash,
                              chunk_text = EXCLUDED.chunk_text,
                              dimensions = EXCLUDED.dimensions,
                              vector = EXCLUDED.vector,
                              created_at = EXCLUDED.created_at
                "#,
            )
            .bind(record.document_uuid)
            .bind(&record.content_hash)
            .bind(&record.model)
            .bind(record.chunk_index)
            .bind(&record.chunk_text)
            .bind(record.dimensions as i32)
            .bind(&vector_json)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

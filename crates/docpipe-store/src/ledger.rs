use chrono::Utc;
use docpipe_types::StepStatus;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::error::StoreError;

/// The pipeline execution ledger: one row per `(document_uuid, content_hash,
/// step_name)`. Only `ok` rows make a step idempotent — a `failed` row does
/// not block a later attempt at the same step.
pub struct PipelineLedger {
    pool: PgPool,
}

impl PipelineLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up whether a step has already reached a terminal `ok` for this
    /// document revision. Used by the executor before invoking a step.
    #[instrument(skip(self))]
    pub async fn is_done(
        &self,
        document_uuid: Uuid,
        content_hash: &str,
        step_name: &str,
    ) -> Result<bool, StoreError> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status FROM pipeline_execution
            WHERE document_uuid = $1 AND content_hash = $2 AND step_name = $3
            "#,
        )
        .bind(document_uuid)
        .bind(content_hash)
        .bind(step_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status.as_deref() == Some("ok"))
    }

    /// Record a step outcome, upserting on the `(document_uuid,
    /// content_hash, step_name)` key so a redelivered event's retry
    /// overwrites the prior `failed` row rather than conflicting with it.
    /// `tokens`/`duration_ms` are the metrics a step reported on success;
    /// `Skipped`/`Failed` outcomes pass `None` for both.
    pub async fn record(
        &self,
        document_uuid: Uuid,
        content_hash: &str,
        step_name: &str,
        status: StepStatus,
        error: Option<&str>,
        tokens: Option<u32>,
        duration_ms: Option<u64>,
    ) -> Result<(), StoreError> {
        let status_str = match status {
            StepStatus::Ok => "ok",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        };

        sqlx::query(
            r#"
            INSERT INTO pipeline_execution (document_uuid, content_hash, step_name, status, attempts, executed_at, error, tokens, duration_ms)
            VALUES ($1, $2, $3, $4, 1, $5, $6, $7, $8)
            ON CONFLICT (document_uuid, content_hash, step_name)
            DO UPDATE SET
                status = EXCLUDED.status,
                attempts = pipeline_execution.attempts + 1,
                executed_at = EXCLUDED.executed_at,
                error = EXCLUDED.error,
                tokens = EXCLUDED.tokens,
                duration_ms = EXCLUDED.duration_ms
            "#,
        )
        .bind(document_uuid)
        .bind(content_hash)
        .bind(step_name)
        .bind(status_str)
        .bind(Utc::now())
        .bind(error)
        .bind(tokens.map(|t| t as i64))
        .bind(duration_ms.map(|d| d as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

use chrono::{DateTime, Utc};
use docpipe_types::{OutboxEntry, OutboxStatus, RevisionEvent};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::StoreError;

/// Writes outbox rows inside the caller's transaction.
///
/// `enqueue` takes `&mut Transaction` rather than a pool, which is what
/// makes the "runs inside the caller's transaction" contract a type-level
/// guarantee rather than a runtime check: there is no way to call this
/// without already holding an open transaction.
pub struct OutboxWriter;

impl OutboxWriter {
    /// Enqueue a revision event. On a duplicate idempotent key the existing
    /// row's id is returned and no new row is written — enqueuing the same
    /// `(document_uuid, content_hash)` twice is a silent success, not an
    /// error.
    #[instrument(skip(tx, event), fields(document_uuid = %event.document_uuid))]
    pub async fn enqueue(
        tx: &mut Transaction<'_, Postgres>,
        event: &RevisionEvent,
    ) -> Result<i64, StoreError> {
        let idempotent_key = event.idempotency_key();
        let payload = serde_json::to_value(event)?;

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO outbox (document_uuid, idempotent_key, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (idempotent_key) DO NOTHING
            RETURNING outbox_id
            "#,
        )
        .bind(event.document_uuid)
        .bind(&idempotent_key)
        .bind(&payload)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(outbox_id) = inserted {
            debug!(outbox_id, "revision event enqueued to outbox");
            return Ok(outbox_id);
        }

        let outbox_id =
            sqlx::query_scalar::<_, i64>("SELECT outbox_id FROM outbox WHERE idempotent_key = $1")
                .bind(&idempotent_key)
                .fetch_one(&mut **tx)
                .await?;
        debug!(outbox_id, "revision event already enqueued, skipping");
        Ok(outbox_id)
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    outbox_id: i64,
    document_uuid: Uuid,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    created_at: DateTime<Utc>,
    relayed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxEntry {
            outbox_id: row.outbox_id,
            document_uuid: row.document_uuid,
            payload: serde_json::from_value(row.payload)?,
            status: match row.status.as_str() {
                "pending" => OutboxStatus::Pending,
                "relayed" => OutboxStatus::Relayed,
                "failed" => OutboxStatus::Failed,
                other => {
                    return Err(StoreError::Invariant {
                        message: format!("unknown outbox status {other}"),
                    });
                }
            },
            attempts: row.attempts,
            created_at: row.created_at,
            relayed_at: row.relayed_at,
            last_error: row.last_error,
        })
    }
}

/// Relay-side view of the outbox: claims pending rows and records the
/// outcome of publishing them to the event log.
pub struct OutboxRelayRepository {
    pool: PgPool,
}

impl OutboxRelayRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim up to `limit` pending rows using `SELECT ... FOR UPDATE SKIP
    /// LOCKED`, in insertion order. Multiple relay processes can call this
    /// concurrently without claiming the same row twice: a row locked by
    /// one transaction is invisible to the others until it commits or
    /// rolls back.
    #[instrument(skip(self))]
    pub async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT outbox_id, document_uuid, payload, status, attempts, created_at, relayed_at, last_error
            FROM outbox
            WHERE status = 'pending'
            ORDER BY outbox_id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        rows.into_iter().map(OutboxEntry::try_from).collect()
    }

    /// Record a successful publish.
    pub async fn mark_relayed(&self, outbox_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'relayed', relayed_at = now()
            WHERE outbox_id = $1
            "#,
        )
        .bind(outbox_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed publish attempt. Returns the attempt count after
    /// this failure so the caller can compare against `max_attempts` and
    /// decide whether to permanently fail the row.
    pub async fn record_attempt_failure(
        &self,
        outbox_id: i64,
        error: &str,
    ) -> Result<i32, StoreError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE outbox
            SET attempts = attempts + 1, last_error = $2
            WHERE outbox_id = $1
            RETURNING attempts
            "#,
        )
        .bind(outbox_id)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts)
    }

    /// Permanently fail a row after `max_attempts` is exhausted.
    pub async fn mark_failed(&self, outbox_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE outbox SET status = 'failed' WHERE outbox_id = $1")
            .bind(outbox_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete relayed rows older than `older_than_hours`. Run periodically
    /// to keep the outbox table from growing unbounded; relayed rows carry
    /// no information the event log doesn't already have.
    #[instrument(skip(self))]
    pub async fn sweep_relayed(&self, older_than_hours: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox
            WHERE status = 'relayed'
              AND relayed_at < now() - ($1 || ' hours')::interval
            "#,
        )
        .bind(older_than_hours.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

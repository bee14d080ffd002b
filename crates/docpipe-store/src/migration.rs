use chrono::{DateTime, Utc};
use docpipe_types::{ItemStatus, JobStatus, MigrationItem, MigrationJob, MigrationStrategy};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::error::StoreError;

fn item_status_str(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Pending => "pending",
        ItemStatus::InProgress => "in_progress",
        ItemStatus::Completed => "completed",
        ItemStatus::Failed => "failed",
        ItemStatus::Skipped => "skipped",
    }
}

fn parse_item_status(raw: &str) -> Result<ItemStatus, StoreError> {
    match raw {
        "pending" => Ok(ItemStatus::Pending),
        "in_progress" => Ok(ItemStatus::InProgress),
        "completed" => Ok(ItemStatus::Completed),
        "failed" => Ok(ItemStatus::Failed),
        "skipped" => Ok(ItemStatus::Skipped),
        other => Err(StoreError::Invariant {
            message: format!("unknown migration item status {other}"),
        }),
    }
}

/// Repository over `migration_job`, `migration_item`, and `migration_outbox`.
pub struct MigrationStore {
    pool: PgPool,
}

impl MigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_job(
        &self,
        job_id: Uuid,
        name: &str,
        strategy: MigrationStrategy,
        ruleset_name: &str,
    ) -> Result<(), StoreError> {
        let strategy_str = match strategy {
            MigrationStrategy::Copy => "copy",
            MigrationStrategy::Move => "move",
        };
        sqlx::query(
            r#"
            INSERT INTO migration_job (job_id, name, strategy, status, ruleset_name)
            VALUES ($1, $2, $3, 'pending', $4)
            "#,
        )
        .bind(job_id)
        .bind(name)
        .bind(strategy_str)
        .bind(ruleset_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Enqueue one item: a `migration_item` row plus a `migration_outbox`
    /// row, in a single transaction, keyed by the idempotent key
    /// `{job_id}:{document_uuid}` so re-enqueuing is a no-op.
    #[instrument(skip(self))]
    pub async fn enqueue_item(
        &self,
        job_id: Uuid,
        document_uuid: Uuid,
        expected_content_hash: &str,
        max_attempts: i32,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO migration_item (job_id, document_uuid, expected_content_hash, status, max_attempts)
            VALUES ($1, $2, $3, 'pending', $4)
            ON CONFLICT (job_id, document_uuid) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(document_uuid)
        .bind(expected_content_hash)
        .bind(max_attempts)
        .execute(&mut *tx)
        .await?;

        let idempotent_key = format!("{job_id}:{document_uuid}");
        sqlx::query(
            r#"
            INSERT INTO migration_outbox (job_id, document_uuid, idempotent_key, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (idempotent_key) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(document_uuid)
        .bind(&idempotent_key)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE migration_job SET total_items = total_items + 1 WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn start_job(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE migration_job SET status = 'running', started_at = now() WHERE job_id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claim pending migration-outbox rows with `FOR UPDATE SKIP LOCKED`,
    /// the same claim protocol the main relay uses.
    pub async fn claim_pending_outbox(
        &self,
        limit: i64,
    ) -> Result<Vec<(i64, Uuid, Uuid)>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(i64, Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT outbox_id, job_id, document_uuid
            FROM migration_outbox
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
        Ok(rows)
    }

    /// Advance an item to `in_progress`, returning its attempt count after
    /// the claim.
    pub async fn claim_item(
        &self,
        job_id: Uuid,
        document_uuid: Uuid,
    ) -> Result<i32, StoreError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE migration_item
            SET status = 'in_progress', attempts = attempts + 1, updated_at = now()
            WHERE job_id = $1 AND document_uuid = $2
            RETURNING attempts
            "#,
        )
        .bind(job_id)
        .bind(document_uuid)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts)
    }

    /// Transition an item to a terminal (or pending-for-redelivery) status
    /// and update the job's running counters when the status is terminal.
    ///
    /// `content_match`/the hash and destination-id fields are only known
    /// once a write-and-read-back cycle has happened; callers pass `None`
    /// for whichever of these the current transition didn't establish, and
    /// the update leaves the existing column value in place rather than
    /// clobbering it with a null.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self))]
    pub async fn set_item_status(
        &self,
        job_id: Uuid,
        document_uuid: Uuid,
        status: ItemStatus,
        error: Option<&str>,
        content_match: Option<bool>,
        source_content_hash: Option<&str>,
        destination_content_hash: Option<&str>,
        destination_local_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE migration_item
            SET status = $3,
                last_error = $4,
                content_match = COALESCE($5, content_match),
                source_content_hash = COALESCE($6, source_content_hash),
                destination_content_hash = COALESCE($7, destination_content_hash),
                destination_local_id = COALESCE($8, destination_local_id),
                updated_at = now()
            WHERE job_id = $1 AND document_uuid = $2
            "#,
        )
        .bind(job_id)
        .bind(document_uuid)
        .bind(item_status_str(status))
        .bind(error)
        .bind(content_match)
        .bind(source_content_hash)
        .bind(destination_content_hash)
        .bind(destination_local_id)
        .execute(&mut *tx)
        .await?;

        match status {
            ItemStatus::Completed => {
                sqlx::query(
                    "UPDATE migration_job SET completed_items = completed_items + 1 WHERE job_id = $1",
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            ItemStatus::Failed => {
                sqlx::query(
                    "UPDATE migration_job SET failed_items = failed_items + 1 WHERE job_id = $1",
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            ItemStatus::Skipped => {
                sqlx::query(
                    "UPDATE migration_job SET skipped_items = skipped_items + 1 WHERE job_id = $1",
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            _ => {}
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_outbox_relayed(&self, outbox_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE migration_outbox SET status = 'relayed', relayed_at = now() WHERE outbox_id = $1",
        )
        .bind(outbox_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a job's current row, used both by the status CLI command and
    /// by the terminal-state invariant check (`total = completed + failed +
    /// skipped`; every completed item's content hash matched).
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<MigrationJob>, StoreError> {
        let row: Option<(
            Uuid,
            String,
            String,
            String,
            String,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
            i64,
            i64,
            i64,
            i64,
        )> = sqlx::query_as(
            r#"
            SELECT job_id, name, strategy, status, ruleset_name, created_at, started_at, completed_at,
                   total_items, completed_items, failed_items, skipped_items
            FROM migration_job WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(
                job_id,
                name,
                strategy,
                status,
                ruleset_name,
                created_at,
                started_at,
                completed_at,
                total_items,
                completed_items,
                failed_items,
                skipped_items,
            )| {
                Ok(MigrationJob {
                    job_id,
                    name,
                    strategy: match strategy.as_str() {
                        "copy" => MigrationStrategy::Copy,
                        "move" => MigrationStrategy::Move,
                        other => {
                            return Err(StoreError::Invariant {
                                message: format!("unknown migration strategy {other}"),
                            });
                        }
                    },
                    status: match status.as_str() {
                        "pending" => JobStatus::Pending,
                        "running" => JobStatus::Running,
                        "completed" => JobStatus::Completed,
                        "failed" => JobStatus::Failed,
                        "cancelled" => JobStatus::Cancelled,
                        other => {
                            return Err(StoreError::Invariant {
                                message: format!("unknown migration job status {other}"),
                            });
                        }
                    },
                    ruleset_name,
                    created_at,
                    started_at,
                    completed_at,
                    total_items,
                    completed_items,
                    failed_items,
                    skipped_items,
                })
            },
        )
        .transpose()
    }

    /// Count items by status for a job, used to decide whether the job has
    /// reached a terminal state (every item completed, failed, or skipped).
    pub async fn count_open_items(&self, job_id: Uuid) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM migration_item
            WHERE job_id = $1 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Fetch a single item, used by the migration worker to recover the
    /// expected content hash it enqueued against.
    pub async fn get_item(
        &self,
        job_id: Uuid,
        document_uuid: Uuid,
    ) -> Result<Option<MigrationItem>, StoreError> {
        let row: Option<ItemRow> = sqlx::query_as(
            r#"
            SELECT job_id, document_uuid, expected_content_hash, source_content_hash,
                   destination_content_hash, destination_local_id, content_match,
                   status, attempts, max_attempts, last_error, updated_at
            FROM migration_item
            WHERE job_id = $1 AND document_uuid = $2
            "#,
        )
        .bind(job_id)
        .bind(document_uuid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(item_from_row).transpose()
    }

    /// Mark a job completed once no items remain pending or in progress.
    /// Returns `None` if items are still open. A job with `failed_items >
    /// 0` is still marked `completed` — the per-item failures are the
    /// caller's signal to alert, not a reason to flip the job itself to
    /// `failed`.
    pub async fn finalize_job_if_done(&self, job_id: Uuid) -> Result<Option<MigrationJob>, StoreError> {
        if self.count_open_items(job_id).await? > 0 {
            return Ok(None);
        }
        sqlx::query(
            "UPDATE migration_job SET status = 'completed', completed_at = now() WHERE job_id = $1 AND status != 'completed'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        self.get_job(job_id).await
    }

    /// List every item under a job, for the CLI's status/doctor views.
    pub async fn list_items(&self, job_id: Uuid) -> Result<Vec<MigrationItem>, StoreError> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            r#"
            SELECT job_id, document_uuid, expected_content_hash, source_content_hash,
                   destination_content_hash, destination_local_id, content_match,
                   status, attempts, max_attempts, last_error, updated_at
            FROM migration_item
            WHERE job_id = $1
            ORDER BY document_uuid ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }
}

type ItemRow = (
    Uuid,
    Uuid,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<bool>,
    String,
    i32,
    i32,
    Option<String>,
    DateTime<Utc>,
);

fn item_from_row(row: ItemRow) -> Result<MigrationItem, StoreError> {
    let (
        job_id,
        document_uuid,
        expected_content_hash,
        source_content_hash,
        destination_content_hash,
        destination_local_id,
        content_match,
        status,
        attempts,
        max_attempts,
        last_error,
        updated_at,
    ) = row;

    Ok(MigrationItem {
        job_id,
        document_uuid,
        expected_content_hash,
        source_content_hash,
        destination_content_hash,
        destination_local_id,
        content_match,
        status: parse_item_status(&status)?,
        attempts,
        max_attempts,
        last_error,
        updated_at,
    })
}


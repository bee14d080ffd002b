//! Migration sub-core (C8): a bounded backfill job runner, independent of
//! the steady-state relay/consumer-worker path but reusing its claim
//! protocol (`FOR UPDATE SKIP LOCKED` over `migration_outbox`) and content
//! hash normalization conventions.

pub mod ports;

use std::sync::Arc;

use docpipe_store::MigrationStore;
use docpipe_types::{normalize_content_hash, ItemStatus, MigrationStrategy};
use docpipe_webhook::{AlertEvent, WebhookConfig};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::migration::ports::{MigrationDestination, MigrationSource};
use crate::ports::WorkspaceContentProvider;

pub struct MigrationWorkerConfig {
    pub batch_size: i64,
}

pub struct MigrationWorker {
    store: Arc<MigrationStore>,
    source: Arc<dyn MigrationSource>,
    destination: Arc<dyn MigrationDestination>,
    webhook_config: Arc<WebhookConfig>,
    config: MigrationWorkerConfig,
}

impl MigrationWorker {
    pub fn new(
        store: Arc<MigrationStore>,
        source: Arc<dyn MigrationSource>,
        destination: Arc<dyn MigrationDestination>,
        webhook_config: Arc<WebhookConfig>,
        config: MigrationWorkerConfig,
    ) -> Self {
        Self {
            store,
            source,
            destination,
            webhook_config,
            config,
        }
    }

    /// Claim and process one batch of pending migration items. Returns the
    /// number of items that reached a terminal state (completed, skipped,
    /// or permanently failed) this round.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize, PipelineError> {
        let claimed = self.store.claim_pending_outbox(self.config.batch_size).await?;
        if claimed.is_empty() {
            return Ok(0);
        }

        let mut terminal = 0;
        let mut touched_jobs = Vec::new();
        for (outbox_id, job_id, document_uuid) in claimed {
            if self.process_item(outbox_id, job_id, document_uuid).await? {
                terminal += 1;
            }
            if !touched_jobs.contains(&job_id) {
                touched_jobs.push(job_id);
            }
        }

        // A batch can span multiple jobs, since `claim_pending_outbox` isn't
        // job-scoped. Check each touched job for completion rather than
        // assuming the batch belongs to one job.
        for job_id in touched_jobs {
            if let Some(job) = self.store.finalize_job_if_done(job_id).await? {
                if job.failed_items > 0 {
                    docpipe_webhook::maybe_send_event(
                        &self.webhook_config,
                        AlertEvent::MigrationJobCompletedWithFailures {
                            job_id: job.job_id,
                            total_items: job.total_items,
                            failed_items: job.failed_items,
                        },
                    );
                }
            }
        }

        Ok(terminal)
    }

    /// Process one migration item end to end. Returns `true` if the item
    /// reached a terminal status (completed, skipped, permanently failed);
    /// `false` if it was requeued for redelivery.
    async fn process_item(
        &self,
        outbox_id: i64,
        job_id: Uuid,
        document_uuid: Uuid,
    ) -> Result<bool, PipelineError> {
        let item = self
            .store
            .get_item(job_id, document_uuid)
            .await?
            .ok_or_else(|| PipelineError::Invariant(format!(
                "migration_outbox row {outbox_id} has no matching migration_item"
            )))?;
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::Invariant(format!(
                "migration_outbox row {outbox_id} has no matching migration_job {job_id}"
            )))?;
        let attempts = self.store.claim_item(job_id, document_uuid).await?;

        match self
            .try_migrate(document_uuid, &item.expected_content_hash, job.strategy)
            .await
        {
            Ok(Outcome::Completed {
                source_content_hash,
                destination_content_hash,
                destination_local_id,
            }) => {
                self.store
                    .set_item_status(
                        job_id,
                        document_uuid,
                        ItemStatus::Completed,
                        None,
                        Some(true),
                        Some(&source_content_hash),
                        Some(&destination_content_hash),
                        Some(&destination_local_id),
                    )
                    .await?;
                self.store.mark_outbox_relayed(outbox_id).await?;
                Ok(true)
            }
            Ok(Outcome::Skipped(reason)) => {
                self.store
                    .set_item_status(
                        job_id,
                        document_uuid,
                        ItemStatus::Skipped,
                        Some(&reason),
                        None,
                        None,
                        None,
                        None,
                    )
                    .await?;
                self.store.mark_outbox_relayed(outbox_id).await?;
                Ok(true)
            }
            Ok(Outcome::ContentMismatch {
                reason,
                source_content_hash,
                destination_content_hash,
            }) => {
                error!(%document_uuid, reason = %reason, "migration item content mismatch, marking failed");
                self.store
                    .set_item_status(
                        job_id,
                        document_uuid,
                        ItemStatus::Failed,
                        Some(&reason),
                        Some(false),
                        Some(&source_content_hash),
                        Some(&destination_content_hash),
                        None,
                    )
                    .await?;
                self.store.mark_outbox_relayed(outbox_id).await?;
                Ok(true)
            }
            Ok(Outcome::Requeue(reason)) => {
                warn!(%document_uuid, reason = %reason, "migration item requeued");
                self.store
                    .set_item_status(
                        job_id,
                        document_uuid,
                        ItemStatus::Pending,
                        Some(&reason),
                        None,
                        None,
                        None,
                        None,
                    )
                    .await?;
                Ok(false)
            }
            Err(e) => {
                if attempts >= item.max_attempts {
                    error!(%document_uuid, attempts, error = %e, "migration item permanently failed");
                    self.store
                        .set_item_status(
                            job_id,
                            document_uuid,
                            ItemStatus::Failed,
                            Some(&e.to_string()),
                            None,
                            None,
                            None,
                            None,
                        )
                        .await?;
                    self.store.mark_outbox_relayed(outbox_id).await?;
                    Ok(true)
                } else {
                    warn!(%document_uuid, attempts, error = %e, "migration item failed, will retry");
                    self.store
                        .set_item_status(
                            job_id,
                            document_uuid,
                            ItemStatus::Pending,
                            Some(&e.to_string()),
                            None,
                            None,
                            None,
                            None,
                        )
                        .await?;
                    Ok(false)
                }
            }
        }
    }

    async fn try_migrate(
        &self,
        document_uuid: Uuid,
        expected_content_hash: &str,
        strategy: MigrationStrategy,
    ) -> Result<Outcome, PipelineError> {
        let content = self.source.fetch_content(document_uuid).await?;
        let source_hash = normalize_content_hash(&content.content_hash).to_string();
        let expected = normalize_content_hash(expected_content_hash);

        if source_hash != expected {
            return Ok(Outcome::Requeue(format!(
                "source content changed since enqueue (expected {expected}, found {source_hash})"
            )));
        }

        if let Some(existing) = self.destination.existing_content_hash(document_uuid).await? {
            if normalize_content_hash(&existing) == source_hash {
                return Ok(Outcome::Skipped("already-migrated".to_string()));
            }
        }

        let destination_local_id = self.destination.write(document_uuid, &content.text).await?;
        let readback = self.destination.read_back_hash(document_uuid).await?;
        let destination_hash = normalize_content_hash(&readback).to_string();

        if destination_hash != source_hash {
            return Ok(Outcome::ContentMismatch {
                reason: format!(
                    "content-mismatch: wrote hash {source_hash}, read back {readback}"
                ),
                source_content_hash: source_hash,
                destination_content_hash: destination_hash,
            });
        }

        if strategy == MigrationStrategy::Move {
            // Re-confirm the destination holds the written content before
            // deleting the source copy.
            match self.destination.existing_content_hash(document_uuid).await? {
                Some(hash) if normalize_content_hash(&hash) == source_hash => {
                    self.source.delete_content(document_uuid).await?;
                }
                _ => {
                    return Err(PipelineError::Poison(
                        "move strategy: destination re-read did not confirm presence before deleting source".to_string(),
                    ));
                }
            }
        }

        Ok(Outcome::Completed {
            source_content_hash: source_hash,
            destination_content_hash: destination_hash,
            destination_local_id,
        })
    }
}

enum Outcome {
    Completed {
        source_content_hash: String,
        destination_content_hash: String,
        destination_local_id: String,
    },
    Skipped(String),
    ContentMismatch {
        reason: String,
        source_content_hash: String,
        destination_content_hash: String,
    },
    Requeue(String),
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Mutex;

    use super::*;
    use crate::ports::{DocumentContent, WorkspaceContentProvider};

    #[derive(Default)]
    struct FakeSource {
        content: String,
        content_hash: String,
        deleted: Mutex<bool>,
    }

    #[async_trait]
    impl WorkspaceContentProvider for FakeSource {
        async fn fetch_content(&self, _document_uuid: Uuid) -> Result<DocumentContent, PipelineError> {
            Ok(DocumentContent {
                text: self.content.clone(),
                content_hash: self.content_hash.clone(),
            })
        }
    }

    #[async_trait]
    impl MigrationSource for FakeSource {
        async fn delete_content(&self, _document_uuid: Uuid) -> Result<(), PipelineError> {
            *self.deleted.lock().unwrap() = true;
            Ok(())
        }
    }

    fn source(content: &str, content_hash: &str) -> FakeSource {
        FakeSource {
            content: content.to_string(),
            content_hash: content_hash.to_string(),
            deleted: Mutex::new(false),
        }
    }

    #[derive(Default)]
    struct FakeDestination {
        existing: Mutex<Option<String>>,
        written: Mutex<Option<String>>,
        readback_hash: Mutex<Option<String>>,
    }

    #[async_trait]
    impl MigrationDestination for FakeDestination {
        async fn existing_content_hash(&self, _document_uuid: Uuid) -> Result<Option<String>, PipelineError> {
            Ok(self.existing.lock().unwrap().clone())
        }

        async fn write(&self, _document_uuid: Uuid, content: &str) -> Result<String, PipelineError> {
            *self.written.lock().unwrap() = Some(content.to_string());
            Ok("dest-local-id".to_string())
        }

        async fn read_back_hash(&self, _document_uuid: Uuid) -> Result<String, PipelineError> {
            self.readback_hash
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| PipelineError::Invariant("no readback hash configured".to_string()))
        }
    }

    /// A `MigrationStore` backed by a lazily-connected pool: constructing it
    /// never touches the network, so `try_migrate` (which never consults
    /// `self.store`) can be exercised without a live database.
    fn unused_store() -> MigrationStore {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction never touches the network");
        MigrationStore::new(pool)
    }

    fn worker(source: FakeSource, destination: FakeDestination) -> MigrationWorker {
        MigrationWorker::new(
            Arc::new(unused_store()),
            Arc::new(source),
            Arc::new(destination),
            Arc::new(WebhookConfig::default()),
            MigrationWorkerConfig { batch_size: 10 },
        )
    }

    #[tokio::test]
    async fn try_migrate_writes_and_completes_on_matching_readback() {
        let src = source("hello world", "sha256:abc");
        let destination = Arc::new(FakeDestination::default());
        *destination.readback_hash.lock().unwrap() = Some("abc".to_string());
        let w = MigrationWorker::new(
            Arc::new(unused_store()),
            Arc::new(src),
            destination.clone(),
            Arc::new(WebhookConfig::default()),
            MigrationWorkerConfig { batch_size: 10 },
        );

        let outcome = w
            .try_migrate(Uuid::new_v4(), "sha256:abc", MigrationStrategy::Copy)
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Completed { .. }));
        assert_eq!(
            destination.written.lock().unwrap().as_deref(),
            Some("hello world")
        );
    }

    #[tokio::test]
    async fn try_migrate_requeues_when_source_changed_since_enqueue() {
        let src = source("new content", "sha256:new");
        let w = worker(src, FakeDestination::default());

        let outcome = w
            .try_migrate(Uuid::new_v4(), "sha256:stale", MigrationStrategy::Copy)
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Requeue(_)));
    }

    #[tokio::test]
    async fn try_migrate_skips_when_destination_already_matches() {
        let src = source("hello world", "sha256:abc");
        let destination = FakeDestination::default();
        *destination.existing.lock().unwrap() = Some("sha256:abc".to_string());
        let w = worker(src, destination);

        let outcome = w
            .try_migrate(Uuid::new_v4(), "sha256:abc", MigrationStrategy::Copy)
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Skipped(reason) if reason == "already-migrated"));
    }

    #[tokio::test]
    async fn try_migrate_flags_content_mismatch_on_readback_mismatch() {
        let src = source("hello world", "sha256:abc");
        let destination = FakeDestination::default();
        *destination.readback_hash.lock().unwrap() = Some("not-abc".to_string());
        let w = worker(src, destination);

        let outcome = w
            .try_migrate(Uuid::new_v4(), "sha256:abc", MigrationStrategy::Copy)
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::ContentMismatch { .. }));
    }

    #[tokio::test]
    async fn move_strategy_deletes_source_after_verified_write() {
        let src = Arc::new(source("hello world", "sha256:abc"));
        let destination = Arc::new(FakeDestination::default());
        *destination.readback_hash.lock().unwrap() = Some("abc".to_string());
        let w = MigrationWorker::new(
            Arc::new(unused_store()),
            src.clone(),
            destination.clone(),
            Arc::new(WebhookConfig::default()),
            MigrationWorkerConfig { batch_size: 10 },
        );

        // The move strategy re-reads the destination before deleting; the
        // fake's `existing_content_hash` must reflect the write it just did.
        *destination.existing.lock().unwrap() = Some("abc".to_string());

        let outcome = w
            .try_migrate(Uuid::new_v4(), "sha256:abc", MigrationStrategy::Move)
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Completed { .. }));
        assert!(*src.deleted.lock().unwrap());
    }

    #[tokio::test]
    async fn move_strategy_does_not_delete_source_without_destination_confirmation() {
        let src = Arc::new(source("hello world", "sha256:abc"));
        let destination = Arc::new(FakeDestination::default());
        *destination.readback_hash.lock().unwrap() = Some("abc".to_string());
        let w = MigrationWorker::new(
            Arc::new(unused_store()),
            src.clone(),
            destination.clone(),
            Arc::new(WebhookConfig::default()),
            MigrationWorkerConfig { batch_size: 10 },
        );

        let err = w
            .try_migrate(Uuid::new_v4(), "sha256:abc", MigrationStrategy::Move)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Poison(_)));
        assert!(!*src.deleted.lock().unwrap());
    }
}

#[instrument(skip(worker))]
pub async fn run_job_to_completion(worker: &MigrationWorker, job_id: Uuid) -> Result<(), PipelineError> {
    worker.store.start_job(job_id).await?;
    loop {
        let processed = worker.run_once().await?;
        if worker.store.count_open_items(job_id).await? == 0 {
            break;
        }
        if processed == 0 {
            // Nothing claimable and nothing open: another worker is holding
            // the remaining rows, or they're all requeued-pending waiting on
            // a retry delay. Back off briefly rather than busy-looping.
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    if let Some(job) = worker.store.finalize_job_if_done(job_id).await? {
        info!(%job_id, completed = job.completed_items, failed = job.failed_items, "migration job finished");
        if job.failed_items > 0 {
            docpipe_webhook::maybe_send_event(
                &worker.webhook_config,
                AlertEvent::MigrationJobCompletedWithFailures {
                    job_id: job.job_id,
                    total_items: job.total_items,
                    failed_items: job.failed_items,
                },
            );
        }
    }
    Ok(())
}

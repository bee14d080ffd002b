//! Consumer worker (C3): drains the event log, resolves a ruleset, runs the
//! matched pipeline, and commits the offset only once every selected step
//! reached a terminal disposition.

use std::sync::Arc;

use docpipe_eventlog::{ConsumedRecord, EventLogClient, RecordHeaders};
use docpipe_store::PipelineLedger;
use docpipe_types::RevisionEvent;
use docpipe_webhook::{AlertEvent, WebhookConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::executor::{Disposition, PipelineExecutor};
use crate::ruleset::RulesetMatcher;
use crate::steps::StepRegistry;

pub struct WorkerConfig {
    pub dlq_topic: String,
    pub dlq_after_attempts: u32,
    pub retry: docpipe_retry::RetryStrategyConfig,
    pub per_error: docpipe_retry::PerErrorConfig,
}

/// Everything one consumer task needs to process records independently of
/// the others; cheap to clone so `spawn_worker_pool` can hand one to each
/// tokio task.
#[derive(Clone)]
pub struct WorkerContext {
    pub event_log: Arc<dyn EventLogClient>,
    pub matcher: Arc<RulesetMatcher>,
    pub registry: Arc<StepRegistry>,
    pub ledger: Arc<PipelineLedger>,
    pub webhook_config: Arc<WebhookConfig>,
}

/// Spawn `count` independent consumer loops sharing one `CancellationToken`.
/// Each loop polls the same consumer-group subscription, so Kafka balances
/// partitions across them; the number of tasks is an application-level
/// concurrency knob, not a partition assignment.
pub fn spawn_worker_pool(
    ctx: WorkerContext,
    config: Arc<WorkerConfig>,
    count: usize,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let ctx = ctx.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { run_worker_loop(id, ctx, config, cancel).await })
        })
        .collect()
}

#[instrument(skip(ctx, config, cancel), fields(worker_id = id))]
async fn run_worker_loop(
    id: usize,
    ctx: WorkerContext,
    config: Arc<WorkerConfig>,
    cancel: CancellationToken,
) {
    info!("worker starting");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("worker received shutdown signal");
                break;
            }
            polled = ctx.event_log.poll() => {
                match polled {
                    Ok(Some(record)) => {
                        if let Err(e) = process_record(&ctx, &config, record).await {
                            error!(error = %e, "failed to process record");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "poll failed");
                    }
                }
            }
        }
    }
    info!("worker stopped");
}

/// Process one record end to end: deserialize, match a ruleset, run the
/// pipeline, retry retryable failures in-process up to
/// `dlq_after_attempts`, then either commit or move to the DLQ and commit.
#[instrument(skip(ctx, config, record), fields(topic = %record.topic, partition = record.partition, offset = record.offset))]
async fn process_record(
    ctx: &WorkerContext,
    config: &WorkerConfig,
    record: ConsumedRecord,
) -> anyhow::Result<()> {
    let event: RevisionEvent = match serde_json::from_slice(&record.payload) {
        Ok(event) => event,
        Err(e) => {
            // A malformed payload can never become processable by waiting;
            // commit past it rather than stalling the partition forever.
            error!(error = %e, "malformed record payload, skipping");
            ctx.event_log.commit(&record).await?;
            return Ok(());
        }
    };

    let steps = match ctx.matcher.match_event(&event) {
        Some(steps) => steps.to_vec(),
        None => {
            ctx.event_log.commit(&record).await?;
            return Ok(());
        }
    };

    let executor = PipelineExecutor::new(&ctx.registry, &ctx.ledger);
    let mut attempt: u32 = 0;

    loop {
        let disposition = executor.execute(&event, &steps).await?;
        match disposition {
            Disposition::Terminal(results) => {
                let failed = results.iter().filter(|r| r.error.is_some()).count();
                if failed > 0 {
                    warn!(failed, "pipeline completed with non-retryable failures");
                }
                ctx.event_log.commit(&record).await?;
                return Ok(());
            }
            Disposition::Retry {
                retryable_step, ..
            } => {
                attempt += 1;
                if attempt >= config.dlq_after_attempts {
                    error!(
                        step = %retryable_step,
                        attempt,
                        "retry budget exhausted, sending to dead-letter queue"
                    );
                    send_to_dlq(ctx, config, &record, &event, attempt, &retryable_step).await?;
                    ctx.event_log.commit(&record).await?;
                    return Ok(());
                }

                let error_class = docpipe_retry::ErrorClass::Retryable;
                let strategy =
                    docpipe_retry::config_for_error(&config.retry, Some(&config.per_error), error_class);
                let delay = docpipe_retry::calculate_delay(&strategy, attempt);
                warn!(step = %retryable_step, attempt, delay_ms = delay.as_millis() as u64, "retrying step");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn send_to_dlq(
    ctx: &WorkerContext,
    config: &WorkerConfig,
    record: &ConsumedRecord,
    event: &RevisionEvent,
    attempts: u32,
    failed_step: &str,
) -> anyhow::Result<()> {
    ctx.event_log
        .publish(
            &config.dlq_topic,
            &event.document_uuid.to_string(),
            &record.payload,
            RecordHeaders {
                idempotent_key: event.idempotency_key(),
                attempt: attempts,
            },
        )
        .await?;

    docpipe_webhook::maybe_send_event(
        &ctx.webhook_config,
        AlertEvent::RecordSentToDlq {
            document_uuid: event.document_uuid,
            content_hash: event.content_hash.clone(),
            step_name: failed_step.to_string(),
            attempts,
            final_error: format!("step '{failed_step}' exhausted {attempts} attempts"),
        },
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use docpipe_types::{DocumentStatus, DocumentType, ProviderType};
    use uuid::Uuid;

    use super::*;
    use crate::ruleset::RulesetMatcher;
    use crate::steps::StepRegistry;

    struct PublishCall {
        topic: String,
        partition_key: String,
        headers: RecordHeaders,
    }

    #[derive(Default)]
    struct FakeEventLog {
        published: Mutex<Vec<PublishCall>>,
    }

    #[async_trait]
    impl EventLogClient for FakeEventLog {
        async fn publish(
            &self,
            topic: &str,
            partition_key: &str,
            _payload: &[u8],
            headers: RecordHeaders,
        ) -> Result<(), docpipe_eventlog::EventLogError> {
            self.published.lock().unwrap().push(PublishCall {
                topic: topic.to_string(),
                partition_key: partition_key.to_string(),
                headers,
            });
            Ok(())
        }

        async fn poll(&self) -> Result<Option<ConsumedRecord>, docpipe_eventlog::EventLogError> {
            Ok(None)
        }

        async fn commit(&self, _record: &ConsumedRecord) -> Result<(), docpipe_eventlog::EventLogError> {
            Ok(())
        }
    }

    fn test_event() -> RevisionEvent {
        RevisionEvent {
            schema_version: RevisionEvent::CURRENT_SCHEMA_VERSION,
            document_uuid: Uuid::new_v4(),
            revision_ordinal: 1,
            content_hash: "sha256:abc".to_string(),
            provider_type: ProviderType::GoogleDocs,
            provider_document_id: "doc-1".to_string(),
            title: "Title".to_string(),
            status: DocumentStatus::Published,
            document_type: DocumentType::Doc,
            modified_at: Utc::now(),
            project_ref: None,
        }
    }

    /// A `PipelineLedger` backed by a lazily-connected pool: constructing it
    /// never touches the network, so tests that don't exercise the ledger
    /// can build a `WorkerContext` without a live database.
    fn unused_ledger() -> docpipe_store::PipelineLedger {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction never touches the network");
        docpipe_store::PipelineLedger::new(pool)
    }

    fn context(event_log: Arc<FakeEventLog>) -> WorkerContext {
        WorkerContext {
            event_log,
            matcher: Arc::new(RulesetMatcher::new(vec![]).unwrap()),
            registry: Arc::new(StepRegistry::new()),
            ledger: Arc::new(unused_ledger()),
            webhook_config: Arc::new(WebhookConfig::default()),
        }
    }

    #[tokio::test]
    async fn send_to_dlq_publishes_to_the_dlq_topic_with_original_payload() {
        let event_log = Arc::new(FakeEventLog::default());
        let ctx = context(event_log.clone());
        let config = WorkerConfig {
            dlq_topic: "docpipe.dlq".to_string(),
            dlq_after_attempts: 3,
            retry: docpipe_retry::RetryStrategyConfig::default(),
            per_error: docpipe_retry::PerErrorConfig::default(),
        };
        let event = test_event();
        let record = ConsumedRecord {
            topic: "docpipe.revisions".to_string(),
            partition: 0,
            offset: 42,
            key: Some(event.document_uuid.to_string()),
            payload: b"original-payload".to_vec(),
            headers: RecordHeaders {
                idempotent_key: event.idempotency_key(),
                attempt: 3,
            },
        };

        send_to_dlq(&ctx, &config, &record, &event, 3, "embeddings")
            .await
            .unwrap();

        let published = event_log.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "docpipe.dlq");
        assert_eq!(published[0].partition_key, event.document_uuid.to_string());
        assert_eq!(published[0].headers.idempotent_key, event.idempotency_key());
        assert_eq!(published[0].headers.attempt, 3);
    }

    #[tokio::test]
    async fn malformed_payload_is_committed_without_matching_a_ruleset() {
        let event_log = Arc::new(FakeEventLog::default());
        let ctx = context(event_log.clone());
        let config = WorkerConfig {
            dlq_topic: "docpipe.dlq".to_string(),
            dlq_after_attempts: 3,
            retry: docpipe_retry::RetryStrategyConfig::default(),
            per_error: docpipe_retry::PerErrorConfig::default(),
        };
        let record = ConsumedRecord {
            topic: "docpipe.revisions".to_string(),
            partition: 0,
            offset: 7,
            key: None,
            payload: b"not json".to_vec(),
            headers: RecordHeaders {
                idempotent_key: "malformed".to_string(),
                attempt: 0,
            },
        };

        // process_record must return Ok(()) and never panic on a payload
        // that can never become processable by retrying.
        process_record(&ctx, &config, record).await.unwrap();
        assert!(event_log.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_event_is_acknowledged_with_no_steps_run() {
        let event_log = Arc::new(FakeEventLog::default());
        let ctx = context(event_log.clone());
        let config = WorkerConfig {
            dlq_topic: "docpipe.dlq".to_string(),
            dlq_after_attempts: 3,
            retry: docpipe_retry::RetryStrategyConfig::default(),
            per_error: docpipe_retry::PerErrorConfig::default(),
        };
        let event = test_event();
        let record = ConsumedRecord {
            topic: "docpipe.revisions".to_string(),
            partition: 0,
            offset: 1,
            key: Some(event.document_uuid.to_string()),
            payload: serde_json::to_vec(&event).unwrap(),
            headers: RecordHeaders {
                idempotent_key: event.idempotency_key(),
                attempt: 0,
            },
        };

        // The matcher has no rulesets, so `match_event` returns `None` —
        // the record must be acknowledged without ever touching the ledger.
        process_record(&ctx, &config, record).await.unwrap();
        assert!(event_log.published.lock().unwrap().is_empty());
    }
}

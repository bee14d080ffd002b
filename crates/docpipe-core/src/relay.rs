//! Relay (C2): moves pending outbox rows to the event log in
//! approximate per-document insertion order.
//!
//! Exposed as plain `run_once`/`run_forever` functions (not a long-lived
//! struct with internal state) so the same logic runs either as a tokio
//! task inside the document server process or as the entry point of a
//! standalone relay binary.

use std::sync::Arc;

use docpipe_eventlog::{EventLogClient, RecordHeaders};
use docpipe_store::OutboxRelayRepository;
use docpipe_webhook::{AlertEvent, WebhookConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub struct RelayConfig {
    pub topic: String,
    pub batch_size: i64,
    pub max_attempts: u32,
    pub poll_interval: std::time::Duration,
}

/// Claim and publish one batch of pending outbox rows. Returns the number
/// of rows successfully relayed.
#[instrument(skip(repository, event_log, webhook_config, config))]
pub async fn run_once(
    repository: &OutboxRelayRepository,
    event_log: &dyn EventLogClient,
    webhook_config: &WebhookConfig,
    config: &RelayConfig,
) -> anyhow::Result<usize> {
    let entries = repository.claim_pending(config.batch_size).await?;
    if entries.is_empty() {
        return Ok(0);
    }

    let mut relayed = 0;
    for entry in entries {
        let idempotent_key = entry.payload.idempotency_key();
        let payload = serde_json::to_vec(&entry.payload)?;
        let headers = RecordHeaders {
            idempotent_key: idempotent_key.clone(),
            attempt: entry.attempts as u32,
        };

        match event_log
            .publish(&config.topic, &entry.partition_key(), &payload, headers)
            .await
        {
            Ok(()) => {
                repository.mark_relayed(entry.outbox_id).await?;
                relayed += 1;
                debug!(outbox_id = entry.outbox_id, "relayed");
            }
            Err(e) => {
                let attempts = repository
                    .record_attempt_failure(entry.outbox_id, &e.to_string())
                    .await?;
                warn!(outbox_id = entry.outbox_id, attempts, error = %e, "publish failed");

                if attempts as u32 >= config.max_attempts {
                    repository.mark_failed(entry.outbox_id).await?;
                    error!(outbox_id = entry.outbox_id, "outbox row permanently failed");
                    docpipe_webhook::maybe_send_event(
                        webhook_config,
                        AlertEvent::RelayRowFailed {
                            outbox_id: entry.outbox_id,
                            document_uuid: entry.document_uuid,
                            attempts,
                            last_error: e.to_string(),
                        },
                    );
                }
            }
        }
    }

    Ok(relayed)
}

/// Poll loop driving `run_once` until `cancel` fires, draining in-flight
/// publish attempts before returning.
pub async fn run_forever(
    repository: Arc<OutboxRelayRepository>,
    event_log: Arc<dyn EventLogClient>,
    webhook_config: Arc<WebhookConfig>,
    config: RelayConfig,
    cancel: CancellationToken,
) {
    info!(topic = %config.topic, "relay starting");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("relay received shutdown signal, draining");
                break;
            }
            result = run_once(&repository, event_log.as_ref(), &webhook_config, &config) => {
                match result {
                    Ok(count) if count > 0 => debug!(count, "relay batch complete"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "relay batch failed"),
                }
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
    info!("relay stopped");
}

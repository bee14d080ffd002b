//! Kafka-backed implementation of the event log the core requires:
//! topic-per-event-class, partitioning by a supplied key, consumer groups
//! with server-tracked offsets, at-least-once delivery, and record headers
//! for idempotent-key/attempt-count metadata.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::{debug, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("publish timed out")]
    Timeout,
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Metadata carried in record headers, read by the consumer worker before
/// it ever deserializes the payload.
#[derive(Debug, Clone)]
pub struct RecordHeaders {
    pub idempotent_key: String,
    pub attempt: u32,
}

/// A record as read off the log, with enough context to commit its offset
/// once every selected step reaches a terminal disposition.
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: RecordHeaders,
}

/// The event log port the consumer worker and relay depend on. Kept as a
/// trait (rather than calling `RdKafkaEventLog` directly) so tests can
/// substitute an in-memory fake without touching a broker.
#[async_trait]
pub trait EventLogClient: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: &[u8],
        headers: RecordHeaders,
    ) -> Result<(), EventLogError>;

    async fn poll(&self) -> Result<Option<ConsumedRecord>, EventLogError>;

    async fn commit(&self, record: &ConsumedRecord) -> Result<(), EventLogError>;
}

/// Kafka-backed `EventLogClient`. Wraps a `FutureProducer` for publish and a
/// `StreamConsumer` for the subscribe/poll/commit side; a process that only
/// relays (or only consumes) constructs just the half it needs.
pub struct RdKafkaEventLog {
    producer: Option<FutureProducer>,
    consumer: Option<StreamConsumer>,
}

impl RdKafkaEventLog {
    /// Build a publish-only client, used by the relay.
    pub fn producer(bootstrap_servers: &str) -> Result<Self, EventLogError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "30000")
            .create()?;
        Ok(Self {
            producer: Some(producer),
            consumer: None,
        })
    }

    /// Build a consume-only client, used by consumer workers. Offsets are
    /// committed manually (`enable.auto.commit = false`) so a commit only
    /// happens once every selected step for the record reached a terminal
    /// disposition.
    pub fn consumer(
        bootstrap_servers: &str,
        group_id: &str,
        topics: &[&str],
    ) -> Result<Self, EventLogError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(topics)?;
        Ok(Self {
            producer: None,
            consumer: Some(consumer),
        })
    }
}

#[async_trait]
impl EventLogClient for RdKafkaEventLog {
    #[instrument(skip(self, payload, headers), fields(topic, partition_key))]
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: &[u8],
        headers: RecordHeaders,
    ) -> Result<(), EventLogError> {
        let producer = self
            .producer
            .as_ref()
            .expect("publish called on a consume-only event log client");

        let owned_headers = OwnedHeaders::new()
            .insert(rdkafka::message::Header {
                key: "idempotent-key",
                value: Some(headers.idempotent_key.as_str()),
            })
            .insert(rdkafka::message::Header {
                key: "attempt",
                value: Some(headers.attempt.to_string().as_str()),
            });

        let record = FutureRecord::to(topic)
            .key(partition_key)
            .payload(payload)
            .headers(owned_headers);

        match producer.send(record, Duration::from_secs(10)).await {
            Ok((partition, offset)) => {
                debug!(partition, offset, "record published");
                Ok(())
            }
            Err((err, _)) => Err(EventLogError::Kafka(err)),
        }
    }

    async fn poll(&self) -> Result<Option<ConsumedRecord>, EventLogError> {
        let consumer = self
            .consumer
            .as_ref()
            .expect("poll called on a publish-only event log client");

        let message = consumer.recv().await?;

        let idempotent_key = message
            .headers()
            .and_then(|headers| {
                headers
                    .iter()
                    .find(|h| h.key == "idempotent-key")
                    .and_then(|h| h.value.map(|v| String::from_utf8_lossy(v).into_owned()))
            })
            .unwrap_or_default();

        let attempt = message
            .headers()
            .and_then(|headers| {
                headers
                    .iter()
                    .find(|h| h.key == "attempt")
                    .and_then(|h| h.value)
                    .and_then(|v| std::str::from_utf8(v).ok())
                    .and_then(|v| v.parse::<u32>().ok())
            })
            .unwrap_or(0);

        let payload = message
            .payload()
            .ok_or_else(|| EventLogError::Malformed("record has no payload".to_string()))?
            .to_vec();

        Ok(Some(ConsumedRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload,
            headers: RecordHeaders {
                idempotent_key,
                attempt,
            },
        }))
    }

    async fn commit(&self, record: &ConsumedRecord) -> Result<(), EventLogError> {
        let consumer = self
            .consumer
            .as_ref()
            .expect("commit called on a publish-only event log client");

        let mut partitions = rdkafka::TopicPartitionList::new();
        partitions
            .add_partition_offset(
                &record.topic,
                record.partition,
                rdkafka::Offset::Offset(record.offset + 1),
            )
            .map_err(EventLogError::Kafka)?;

        match consumer.commit(&partitions, CommitMode::Async) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "offset commit failed");
                Err(EventLogError::Kafka(err))
            }
        }
    }
}

//! Domain and wire types shared across the docpipe workspace.
//!
//! This crate has no behavior of its own — it exists so that
//! `docpipe-store`, `docpipe-eventlog`, and `docpipe-core` agree on the
//! shape of an outbox row, a pipeline execution record, a derived artifact,
//! and the wire payload that travels across the event log, without any of
//! them depending on each other.

/// Helpers for (de)serializing `Duration` as either a human string or
/// milliseconds, for configuration structs that accept both.
pub mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize, Serialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        Millis(u64),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match DurationHelper::deserialize(deserializer)? {
            DurationHelper::String(s) => humantime::parse_duration(&s)
                .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
            DurationHelper::Millis(ms) => Ok(Duration::from_millis(ms)),
        }
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    /// Same as the parent module, but for `Option<Duration>` fields that
    /// default to absent (e.g. a per-step timeout override).
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw: Option<super::DurationHelper> = Option::deserialize(deserializer)?;
            raw.map(|helper| match helper {
                super::DurationHelper::String(s) => humantime::parse_duration(&s)
                    .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
                super::DurationHelper::Millis(ms) => Ok(Duration::from_millis(ms)),
            })
            .transpose()
        }

        pub fn serialize<S>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }
    }
}

pub mod event;
pub mod outbox;
pub mod ledger;
pub mod artifact;
pub mod ruleset;
pub mod migration;

pub use artifact::{EmbeddingRecord, SummaryRecord};
pub use event::{DocumentStatus, DocumentType, ProviderType, RevisionEvent};
pub use ledger::{PipelineExecutionRecord, StepStatus};
pub use migration::{ItemStatus, JobStatus, MigrationItem, MigrationJob, MigrationStrategy};
pub use outbox::{OutboxEntry, OutboxStatus};
pub use ruleset::{Condition, Predicate, Ruleset, StepConfig};

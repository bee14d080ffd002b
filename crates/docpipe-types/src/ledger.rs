use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome recorded for a single pipeline step against a single revision.
///
/// Only `Ok` rows make a step idempotent: a `Failed` attempt does not block
/// retry, since the next consumer attempt must be able to try the step
/// again. `Skipped` records that a ruleset condition excluded the step so
/// the executor's disposition trace stays complete without re-evaluating
/// the ruleset on redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Skipped,
    Failed,
}

/// One row in the pipeline execution ledger: `(document_uuid, content_hash,
/// step_name)` is the idempotency key a redelivered event is checked
/// against before a step runs again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecutionRecord {
    pub document_uuid: Uuid,
    pub content_hash: String,
    pub step_name: String,
    pub status: StepStatus,
    pub attempts: i32,
    pub executed_at: DateTime<Utc>,
    pub error: Option<String>,
    pub tokens: Option<i64>,
    pub duration_ms: Option<i64>,
}

impl PipelineExecutionRecord {
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.document_uuid, self.content_hash)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a backfill job treats a source document once it has been verified
/// against the destination.
///
/// A job declares one strategy up front rather than allowing a per-item
/// override, so a partially-migrated corpus can't end up with mixed
/// semantics depending on which worker happened to claim which item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStrategy {
    /// Write to the destination and leave the source untouched.
    Copy,
    /// Write to the destination, then delete from the source once the
    /// write is verified by a content-hash-matching read-back.
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// A backfill/migration job: a bounded unit of work over a set of
/// documents, independent of the steady-state relay/consumer path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    pub job_id: Uuid,
    pub name: String,
    pub strategy: MigrationStrategy,
    pub status: JobStatus,
    pub ruleset_name: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_items: i64,
    pub completed_items: i64,
    pub failed_items: i64,
    pub skipped_items: i64,
}

/// A single document enqueued under a [`MigrationJob`].
///
/// `expected_content_hash` is compared against the freshly fetched content
/// hash (after stripping a leading `sha256:` prefix, if present, so
/// provider-qualified and bare hashes compare equal) before the item is
/// dispatched into the pipeline; a mismatch means the source document
/// changed since the job was enqueued and the item is requeued rather than
/// run against stale expectations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationItem {
    pub job_id: Uuid,
    pub document_uuid: Uuid,
    pub expected_content_hash: String,
    /// The content hash actually read from the source at migration time,
    /// once the item has been processed.
    pub source_content_hash: Option<String>,
    /// The content hash read back from the destination after writing.
    pub destination_content_hash: Option<String>,
    /// The destination's provider-local id for the written content.
    pub destination_local_id: Option<String>,
    /// Whether the destination read-back hash matched the source hash.
    /// `None` until the item has gone through a write-and-read-back cycle.
    pub content_match: Option<bool>,
    pub status: ItemStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Strip a leading `sha256:` prefix so hashes from different sources
/// compare equal regardless of whether they carry the algorithm tag.
pub fn normalize_content_hash(hash: &str) -> &str {
    hash.strip_prefix("sha256:").unwrap_or(hash)
}

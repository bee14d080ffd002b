use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An LLM-produced summary attached to a single revision. Mirrors the
/// structured result an `LlmClient` adapter returns, plus the execution
/// metrics the step measured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub document_uuid: Uuid,
    pub content_hash: String,
    pub model: String,
    pub provider: String,
    pub style: String,
    pub executive_summary: String,
    pub key_points: Vec<String>,
    pub topics: Vec<String>,
    pub tags: Vec<String>,
    pub confidence: f32,
    pub tokens: u32,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A single embedded chunk. `chunk_index` orders chunks within a document;
/// batch embedding calls must return vectors in the same order they were
/// submitted so this index stays meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub document_uuid: Uuid,
    pub content_hash: String,
    /// `None` for the non-chunked case (a single row covers the whole
    /// document); `Some(0)`, `Some(1)`, ... for sequential chunks.
    pub chunk_index: Option<i32>,
    pub chunk_text: String,
    pub model: String,
    pub dimensions: u32,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

//! External collaborator traits the step library is written against. Real
//! implementations live behind these so steps can be tested with fakes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PipelineError;

/// Fetches a document's current content and content hash from whichever
/// workspace it lives in.
#[async_trait]
pub trait WorkspaceContentProvider: Send + Sync {
    async fn fetch_content(&self, document_uuid: Uuid) -> Result<DocumentContent, PipelineError>;
}

pub struct DocumentContent {
    pub text: String,
    pub content_hash: String,
}

/// The keyword search index the search-index step upserts into.
#[async_trait]
pub trait SearchIndexClient: Send + Sync {
    async fn upsert(&self, request: SearchUpsertRequest) -> Result<(), PipelineError>;
}

pub struct SearchUpsertRequest {
    pub object_id: Uuid,
    pub title: String,
    pub status: String,
    pub document_type: String,
    pub provider_document_id: String,
    pub is_draft: bool,
}

/// Structured result of an LLM summarization call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LlmSummaryResult {
    pub executive_summary: String,
    pub key_points: Vec<String>,
    pub topics: Vec<String>,
    pub tags: Vec<String>,
    pub confidence: f32,
    pub tokens_used: u32,
    /// The vendor that produced the summary, e.g. `"openai"`, `"anthropic"` —
    /// reported by the adapter, not derived from the model-name prefix.
    pub provider: String,
}

/// Abstracted LLM client. The executor selects a concrete sub-adapter by
/// model-name prefix (`gpt-*`, `claude-*`, `llama*`); callers hold whichever
/// one matched.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn summarize(
        &self,
        content: &str,
        model: &str,
        style: &str,
        max_tokens: u32,
        language: &str,
    ) -> Result<LlmSummaryResult, PipelineError>;
}

/// Batch embedding call. The response vector must preserve request order —
/// callers map it back onto `chunk_index` positionally.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_batch(
        &self,
        chunks: &[String],
        model: &str,
        dimensions: u32,
    ) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Routes to a concrete `LlmClient` sub-adapter (cloud, local, managed-AI)
/// by model-name prefix convention.
pub struct LlmClientRouter {
    adapters: Vec<(String, Box<dyn LlmClient>)>,
}

impl LlmClientRouter {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Register an adapter for every model name starting with `prefix`
    /// (e.g. `"gpt-"`, `"claude-"`, `"llama"`).
    pub fn register(mut self, prefix: &str, adapter: Box<dyn LlmClient>) -> Self {
        self.adapters.push((prefix.to_string(), adapter));
        self
    }

    pub fn resolve(&self, model: &str) -> Option<&dyn LlmClient> {
        self.adapters
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, adapter)| adapter.as_ref())
    }
}

impl Default for LlmClientRouter {
    fn default() -> Self {
        Self::new()
    }
}

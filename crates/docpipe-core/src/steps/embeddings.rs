use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use docpipe_chunking::chunk_content;
use docpipe_store::ArtifactStore;
use docpipe_types::{EmbeddingRecord, RevisionEvent};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::ports::{EmbeddingClient, WorkspaceContentProvider};
use crate::steps::llm_summary::normalize_content;
use crate::steps::{Step, StepOutcome};

#[derive(Debug, Deserialize)]
struct EmbeddingsConfig {
    model: String,
    dimensions: u32,
    #[serde(default)]
    chunk_size: usize,
}

/// Chunks document content (when configured) and issues a batched
/// embedding call, persisting one ledger row per chunk (4.7.3).
pub struct EmbeddingsStep {
    content_provider: Arc<dyn WorkspaceContentProvider>,
    embedding_client: Arc<dyn EmbeddingClient>,
    artifacts: Arc<ArtifactStore>,
}

impl EmbeddingsStep {
    pub fn new(
        content_provider: Arc<dyn WorkspaceContentProvider>,
        embedding_client: Arc<dyn EmbeddingClient>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            content_provider,
            embedding_client,
            artifacts,
        }
    }
}

#[async_trait]
impl Step for EmbeddingsStep {
    fn name(&self) -> &str {
        "embeddings"
    }

    async fn execute(&self, event: &RevisionEvent, config: &serde_json::Value) -> StepOutcome {
        let started = Instant::now();
        let config: EmbeddingsConfig = match serde_json::from_value(config.clone()) {
            Ok(c) => c,
            Err(e) => {
                return StepOutcome::Failed {
                    error: PipelineError::Invariant(format!("invalid embeddings config: {e}")),
                };
            }
        };

        // Pre-check against the non-chunked slot; chunked documents are
        // re-evaluated per chunk once content is fetched, since a chunk
        // count change (content grew/shrank) must not be masked by a stale
        // single-row check.
        if config.chunk_size == 0 {
            match self
                .artifacts
                .existing_embedding_hash(event.document_uuid, &config.model, None)
                .await
            {
                Ok(Some(hash)) if hash == event.content_hash => {
                    return StepOutcome::Skipped {
                        reason: "already-embedded".to_string(),
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    return StepOutcome::Failed {
                        error: PipelineError::Transient(e.to_string()),
                    };
                }
            }
        }

        let content = match self.content_provider.fetch_content(event.document_uuid).await {
            Ok(content) => content,
            Err(error) => return StepOutcome::Failed { error },
        };

        let normalized = normalize_content(&content.text);
        if normalized.is_empty() {
            return StepOutcome::Skipped {
                reason: "empty".to_string(),
            };
        }

        let chunks = chunk_content(&normalized, config.chunk_size);

        let vectors = match self
            .embedding_client
            .embed_batch(&chunks, &config.model, config.dimensions)
            .await
        {
            Ok(vectors) => vectors,
            Err(error) => return StepOutcome::Failed { error },
        };

        if vectors.len() != chunks.len() {
            return StepOutcome::Failed {
                error: PipelineError::Poison(format!(
                    "embedding batch returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                )),
            };
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != config.dimensions as usize) {
            return StepOutcome::Failed {
                error: PipelineError::Poison(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    config.dimensions,
                    bad.len()
                )),
            };
        }

        let records: Vec<EmbeddingRecord> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (chunk_text, vector))| EmbeddingRecord {
                document_uuid: event.document_uuid,
                content_hash: event.content_hash.clone(),
                chunk_index: if config.chunk_size == 0 {
                    None
                } else {
                    Some(index as i32)
                },
                chunk_text,
                model: config.model.clone(),
                dimensions: config.dimensions,
                vector,
                created_at: chrono::Utc::now(),
            })
            .collect();

        if let Err(e) = self.artifacts.save_embeddings(&records).await {
            return StepOutcome::Failed {
                error: PipelineError::Transient(e.to_string()),
            };
        }

        StepOutcome::Ok {
            tokens: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use docpipe_types::{DocumentStatus, DocumentType, ProviderType};
    use uuid::Uuid;

    use super::*;
    use crate::ports::DocumentContent;

    struct FakeContentProvider {
        text: String,
    }

    #[async_trait]
    impl WorkspaceContentProvider for FakeContentProvider {
        async fn fetch_content(&self, _document_uuid: Uuid) -> Result<DocumentContent, PipelineError> {
            Ok(DocumentContent {
                text: self.text.clone(),
                content_hash: "sha256:abc".to_string(),
            })
        }
    }

    struct FakeEmbeddingClient {
        vectors: Vec<Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingClient for FakeEmbeddingClient {
        async fn embed_batch(
            &self,
            _chunks: &[String],
            _model: &str,
            _dimensions: u32,
        ) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(self.vectors.clone())
        }
    }

    /// An `ArtifactStore` over a lazily-connected pool: safe to construct in
    /// these tests because every path exercised here returns before the
    /// step ever calls into it.
    fn unused_artifacts() -> ArtifactStore {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction never touches the network");
        ArtifactStore::new(pool)
    }

    fn event() -> RevisionEvent {
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

    fn step(text: &str, vectors: Vec<Vec<f32>>) -> EmbeddingsStep {
        EmbeddingsStep::new(
            Arc::new(FakeContentProvider {
                text: text.to_string(),
            }),
            Arc::new(FakeEmbeddingClient { vectors }),
            Arc::new(unused_artifacts()),
        )
    }

    #[tokio::test]
    async fn invalid_config_fails_without_touching_any_collaborator() {
        let s = step("irrelevant", vec![]);
        let outcome = s.execute(&event(), &serde_json::json!({"model": 1})).await;
        assert!(matches!(
            outcome,
            StepOutcome::Failed {
                error: PipelineError::Invariant(_)
            }
        ));
    }

    #[tokio::test]
    async fn empty_content_is_skipped() {
        let s = step("", vec![]);
        let config = serde_json::json!({"model": "text-embed-3", "dimensions": 4, "chunk_size": 100});
        let outcome = s.execute(&event(), &config).await;
        assert!(matches!(outcome, StepOutcome::Skipped { reason } if reason == "empty"));
    }

    #[tokio::test]
    async fn whitespace_only_content_normalizes_to_empty_and_is_skipped() {
        let s = step("   \r\n\r\n   ", vec![]);
        let config = serde_json::json!({"model": "text-embed-3", "dimensions": 4, "chunk_size": 100});
        let outcome = s.execute(&event(), &config).await;
        assert!(matches!(outcome, StepOutcome::Skipped { reason } if reason == "empty"));
    }

    #[tokio::test]
    async fn vector_count_mismatch_is_poisoned() {
        let s = step("enough content to chunk", vec![vec![0.0; 4]]);
        let config = serde_json::json!({"model": "text-embed-3", "dimensions": 4, "chunk_size": 5});
        let outcome = s.execute(&event(), &config).await;
        assert!(matches!(
            outcome,
            StepOutcome::Failed {
                error: PipelineError::Poison(_)
            }
        ));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_poisoned() {
        let s = step("short", vec![vec![0.0; 3]]);
        let config = serde_json::json!({"model": "text-embed-3", "dimensions": 4, "chunk_size": 100});
        let outcome = s.execute(&event(), &config).await;
        assert!(matches!(
            outcome,
            StepOutcome::Failed {
                error: PipelineError::Poison(_)
            }
        ));
    }
}

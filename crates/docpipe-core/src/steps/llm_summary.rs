use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use docpipe_store::ArtifactStore;
use docpipe_types::{RevisionEvent, SummaryRecord};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::ports::{LlmClientRouter, WorkspaceContentProvider};
use crate::steps::{Step, StepOutcome};

const MIN_NORMALIZED_LENGTH: usize = 32;

#[derive(Debug, Deserialize)]
struct LlmSummaryConfig {
    model: String,
    #[serde(default = "default_style")]
    style: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_language")]
    language: String,
}

fn default_style() -> String {
    "concise".to_string()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_language() -> String {
    "en".to_string()
}

/// Fetches document content, normalizes it, and calls an LLM to produce a
/// structured summary (4.7.2).
pub struct LlmSummaryStep {
    content_provider: Arc<dyn WorkspaceContentProvider>,
    llm_router: Arc<LlmClientRouter>,
    artifacts: Arc<ArtifactStore>,
}

impl LlmSummaryStep {
    pub fn new(
        content_provider: Arc<dyn WorkspaceContentProvider>,
        llm_router: Arc<LlmClientRouter>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            content_provider,
            llm_router,
            artifacts,
        }
    }
}

/// Trim, collapse runs of 3+ newlines to exactly two, and normalize CRLF /
/// CR to LF.
pub fn normalize_content(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut result = String::with_capacity(unified.len());
    let mut newline_run = 0;
    for ch in unified.trim().chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                result.push(ch);
            }
        } else {
            newline_run = 0;
            result.push(ch);
        }
    }
    result
}

#[async_trait]
impl Step for LlmSummaryStep {
    fn name(&self) -> &str {
        "llm_summary"
    }

    async fn execute(&self, event: &RevisionEvent, config: &serde_json::Value) -> StepOutcome {
        let started = Instant::now();
        let config: LlmSummaryConfig = match serde_json::from_value(config.clone()) {
            Ok(c) => c,
            Err(e) => {
                return StepOutcome::Failed {
                    error: PipelineError::Invariant(format!("invalid llm_summary config: {e}")),
                };
            }
        };

        match self
            .artifacts
            .existing_summary_hash(event.document_uuid, &config.model)
            .await
        {
            Ok(Some(existing_hash)) if existing_hash == event.content_hash => {
                return StepOutcome::Skipped {
                    reason: "already-summarized".to_string(),
                };
            }
            Ok(_) => {}
            Err(e) => {
                return StepOutcome::Failed {
                    error: PipelineError::Transient(e.to_string()),
                };
            }
        }

        let content = match self.content_provider.fetch_content(event.document_uuid).await {
            Ok(content) => content,
            Err(error) => return StepOutcome::Failed { error },
        };

        let normalized = normalize_content(&content.text);
        if normalized.len() < MIN_NORMALIZED_LENGTH {
            return StepOutcome::Skipped {
                reason: "too-short".to_string(),
            };
        }

        let adapter = match self.llm_router.resolve(&config.model) {
            Some(adapter) => adapter,
            None => {
                return StepOutcome::Failed {
                    error: PipelineError::Invariant(format!(
                        "no LLM adapter registered for model '{}'",
                        config.model
                    )),
                };
            }
        };

        let result = match adapter
            .summarize(
                &normalized,
                &config.model,
                &config.style,
                config.max_tokens,
                &config.language,
            )
            .await
        {
            Ok(result) => result,
            Err(error) => return StepOutcome::Failed { error },
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let record = SummaryRecord {
            document_uuid: event.document_uuid,
            content_hash: event.content_hash.clone(),
            model: config.model.clone(),
            provider: result.provider,
            style: config.style.clone(),
            executive_summary: result.executive_summary,
            key_points: result.key_points,
            topics: result.topics,
            tags: result.tags,
            confidence: result.confidence,
            tokens: result.tokens_used,
            duration_ms,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.artifacts.save_summary(&record).await {
            return StepOutcome::Failed {
                error: PipelineError::Transient(e.to_string()),
            };
        }

        StepOutcome::Ok {
            tokens: Some(result.tokens_used),
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_newline_runs_and_trims() {
        let raw = "  hello\r\n\r\n\r\n\r\nworld  ";
        assert_eq!(normalize_content(raw), "hello\n\nworld");
    }

    #[test]
    fn normalize_preserves_single_and_double_newlines() {
        assert_eq!(normalize_content("a\nb"), "a\nb");
        assert_eq!(normalize_content("a\n\nb"), "a\n\nb");
    }
}

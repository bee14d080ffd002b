use std::time::Instant;

use async_trait::async_trait;
use docpipe_types::RevisionEvent;

use crate::error::PipelineError;
use crate::ports::{SearchIndexClient, SearchUpsertRequest};
use crate::steps::{Step, StepOutcome};

/// Upserts a document into the keyword index under object id = document
/// UUID. Drafts and published documents route to distinct logical indices
/// based on the configured draft-status list (4.7.1).
pub struct SearchIndexStep {
    client: Box<dyn SearchIndexClient>,
    draft_statuses: Vec<String>,
}

impl SearchIndexStep {
    pub fn new(client: Box<dyn SearchIndexClient>, draft_statuses: Vec<String>) -> Self {
        Self {
            client,
            draft_statuses,
        }
    }
}

#[async_trait]
impl Step for SearchIndexStep {
    fn name(&self) -> &str {
        "search_index"
    }

    async fn execute(&self, event: &RevisionEvent, _config: &serde_json::Value) -> StepOutcome {
        let started = Instant::now();
        let is_draft = self
            .draft_statuses
            .iter()
            .any(|s| s == event.status.as_str());

        let request = SearchUpsertRequest {
            object_id: event.document_uuid,
            title: event.title.clone(),
            status: event.status.as_str().to_string(),
            document_type: format!("{:?}", event.document_type),
            provider_document_id: event.provider_document_id.clone(),
            is_draft,
        };

        match self.client.upsert(request).await {
            Ok(()) => StepOutcome::Ok {
                tokens: None,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(error) => StepOutcome::Failed { error },
        }
    }
}

/// Classify a search-index error per the step's documented taxonomy:
/// timeout/rate-limit/service-unavailable are retryable, validation errors
/// are not.
pub fn classify_error(message: &str) -> PipelineError {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("rate limit") || lower.contains("unavailable") {
        PipelineError::Transient(message.to_string())
    } else {
        PipelineError::Infrastructure(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_error_matches_documented_taxonomy() {
        assert!(matches!(
            classify_error("request timeout"),
            PipelineError::Transient(_)
        ));
        assert!(matches!(
            classify_error("validation failed: missing title"),
            PipelineError::Infrastructure(_)
        ));
    }
}

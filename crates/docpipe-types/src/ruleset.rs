use serde::{Deserialize, Serialize};

use crate::event::{DocumentStatus, DocumentType, RevisionEvent};

/// A single condition within a ruleset's `conditions` list. A rule matches
/// an event only if every condition in its list is satisfied (conjunction);
/// disjunction is expressed by declaring the same pipeline under multiple
/// rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches when the event's status string is in the given list. The
    /// draft/published routing list (`["draft", "in-progress", "wip"]` by
    /// default) is expressed as one of these.
    StatusIn { statuses: Vec<String> },
    DocumentTypeIs { document_type: DocumentType },
    ProjectRefEquals { project_ref: String },
    /// Matches the document title against a regular expression.
    TitleMatches { pattern: String },
    /// Always matches; used for a catch-all rule at the end of a ruleset.
    Always,
}

impl Predicate {
    pub fn matches(&self, event: &RevisionEvent) -> bool {
        match self {
            Predicate::StatusIn { statuses } => {
                statuses.iter().any(|s| s == event.status.as_str())
            }
            Predicate::DocumentTypeIs { document_type } => event.document_type == *document_type,
            Predicate::ProjectRefEquals { project_ref } => {
                event.project_ref.as_deref() == Some(project_ref.as_str())
            }
            Predicate::TitleMatches { pattern } => regex::Regex::new(pattern)
                .map(|re| re.is_match(&event.title))
                .unwrap_or(false),
            Predicate::Always => true,
        }
    }
}

/// A condition list paired with the pipeline to run when every condition
/// matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub predicates: Vec<Predicate>,
}

impl Condition {
    pub fn matches(&self, event: &RevisionEvent) -> bool {
        self.predicates.iter().all(|p| p.matches(event))
    }
}

/// A single step invocation within a pipeline, with step-specific
/// parameters left as an untyped JSON value so the step library can parse
/// its own shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, with = "crate::duration::option")]
    pub timeout: Option<std::time::Duration>,
}

/// One named entry in the operator-configured ruleset file.
///
/// Matching is first-match-wins: rules are evaluated in declaration order
/// and the first whose `condition` matches the event supplies the pipeline
/// that runs. `accumulate` is accepted in configuration but rejected at
/// load time — see [`crate::migration::MigrationStrategy`] for the
/// analogous all-or-nothing choice on the migration side. Keeping the field
/// here (rather than dropping it) means a ruleset file written against a
/// future accumulate-all matcher fails loudly instead of silently matching
/// only the first rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    pub condition: Condition,
    pub pipeline: Vec<StepConfig>,
    #[serde(default)]
    pub accumulate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DocumentStatus, ProviderType};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event(status: DocumentStatus) -> RevisionEvent {
        RevisionEvent {
            schema_version: RevisionEvent::CURRENT_SCHEMA_VERSION,
            document_uuid: Uuid::nil(),
            revision_ordinal: 1,
            content_hash: "sha256:abc".to_string(),
            provider_type: ProviderType::GoogleDocs,
            provider_document_id: "doc-1".to_string(),
            title: "Q3 Planning Draft".to_string(),
            status,
            document_type: DocumentType::Doc,
            modified_at: Utc::now(),
            project_ref: Some("proj-1".to_string()),
        }
    }

    #[test]
    fn status_in_matches_configured_list() {
        let condition = Condition {
            predicates: vec![Predicate::StatusIn {
                statuses: vec!["draft".to_string(), "wip".to_string()],
            }],
        };
        assert!(condition.matches(&sample_event(DocumentStatus::Draft)));
        assert!(!condition.matches(&sample_event(DocumentStatus::Published)));
    }

    #[test]
    fn conjunction_requires_all_predicates() {
        let condition = Condition {
            predicates: vec![
                Predicate::StatusIn {
                    statuses: vec!["draft".to_string()],
                },
                Predicate::ProjectRefEquals {
                    project_ref: "proj-1".to_string(),
                },
            ],
        };
        assert!(condition.matches(&sample_event(DocumentStatus::Draft)));

        let mismatched = Condition {
            predicates: vec![
                Predicate::StatusIn {
                    statuses: vec!["draft".to_string()],
                },
                Predicate::ProjectRefEquals {
                    project_ref: "proj-2".to_string(),
                },
            ],
        };
        assert!(!mismatched.matches(&sample_event(DocumentStatus::Draft)));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The workspace a revision event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    GoogleDocs,
    Notion,
    Confluence,
    SharePoint,
    LocalUpload,
}

/// Coarse document kind, used by ruleset conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Doc,
    Sheet,
    Slide,
    Pdf,
    Markdown,
    Other,
}

/// Lifecycle status reported by the provider at the time of the revision.
///
/// `Other(String)` preserves provider-specific strings (e.g. a custom Notion
/// database property) that don't map onto a known status, so routing rules
/// can still match on them by exact string. Serialized as a bare string on
/// the wire, so it needs hand-written (de)serialization rather than the
/// usual derive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentStatus {
    Draft,
    InProgress,
    Wip,
    Published,
    Archived,
    Other(String),
}

impl DocumentStatus {
    /// The raw string as it would appear in provider metadata, for rules
    /// that compare against a configurable draft/published status list.
    pub fn as_str(&self) -> &str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::InProgress => "in-progress",
            DocumentStatus::Wip => "wip",
            DocumentStatus::Published => "published",
            DocumentStatus::Archived => "archived",
            DocumentStatus::Other(s) => s,
        }
    }

    fn from_str_value(value: &str) -> Self {
        match value {
            "draft" => DocumentStatus::Draft,
            "in-progress" => DocumentStatus::InProgress,
            "wip" => DocumentStatus::Wip,
            "published" => DocumentStatus::Published,
            "archived" => DocumentStatus::Archived,
            other => DocumentStatus::Other(other.to_string()),
        }
    }
}

impl Serialize for DocumentStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DocumentStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(DocumentStatus::from_str_value(&raw))
    }
}

/// The event recorded in the same transaction as a provider revision write,
/// and later relayed onto the event log.
///
/// `content_hash` together with `document_uuid` forms the idempotency key
/// consumers use to detect redelivery: `{document_uuid}:{content_hash}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionEvent {
    pub schema_version: u16,
    pub document_uuid: Uuid,
    pub revision_ordinal: i64,
    pub content_hash: String,
    pub provider_type: ProviderType,
    pub provider_document_id: String,
    pub title: String,
    pub status: DocumentStatus,
    pub document_type: DocumentType,
    pub modified_at: DateTime<Utc>,
    pub project_ref: Option<String>,
}

impl RevisionEvent {
    pub const CURRENT_SCHEMA_VERSION: u16 = 1;

    /// The idempotency key used by the pipeline execution ledger and by
    /// consumer-side dedup: `{document_uuid}:{content_hash}`.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.document_uuid, self.content_hash)
    }
}

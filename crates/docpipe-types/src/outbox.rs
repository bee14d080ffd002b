use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::RevisionEvent;

/// Lifecycle of a single outbox row, from the co-located insert through
/// relay to the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Relayed,
    Failed,
}

/// A row in the transactional outbox table, written in the same database
/// transaction as the provider-revision write it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub outbox_id: i64,
    pub document_uuid: Uuid,
    pub payload: RevisionEvent,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub relayed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// The partition key used when publishing to the event log: documents
    /// from the same source always land on the same partition, which is
    /// what gives the relay its per-document ordering guarantee.
    pub fn partition_key(&self) -> String {
        self.document_uuid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DocumentStatus, DocumentType, ProviderType};

    fn entry(document_uuid: Uuid) -> OutboxEntry {
        OutboxEntry {
            outbox_id: 1,
            document_uuid,
            payload: RevisionEvent {
                schema_version: RevisionEvent::CURRENT_SCHEMA_VERSION,
                document_uuid,
                revision_ordinal: 1,
                content_hash: "sha256:abc".to_string(),
                provider_type: ProviderType::GoogleDocs,
                provider_document_id: "doc-1".to_string(),
                title: "Title".to_string(),
                status: DocumentStatus::Draft,
                document_type: DocumentType::Doc,
                modified_at: Utc::now(),
                project_ref: None,
            },
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            relayed_at: None,
            last_error: None,
        }
    }

    #[test]
    fn partition_key_is_the_document_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(entry(uuid).partition_key(), uuid.to_string());
    }

    #[test]
    fn same_document_always_yields_same_partition_key() {
        let uuid = Uuid::new_v4();
        let a = entry(uuid);
        let mut b = entry(uuid);
        b.outbox_id = 2;
        b.attempts = 3;
        assert_eq!(a.partition_key(), b.partition_key());
    }
}

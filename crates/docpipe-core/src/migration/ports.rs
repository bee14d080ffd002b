//! Destination-side port the migration worker writes through, and the
//! source-side deletion capability the `move` strategy needs. The rest of
//! the source side reuses [`crate::ports::WorkspaceContentProvider`] — a
//! migration is just a backfill from the same workspace into a (possibly
//! new) index.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::ports::WorkspaceContentProvider;

#[async_trait]
pub trait MigrationDestination: Send + Sync {
    /// Content hash currently stored at the destination for this document,
    /// if any. Used to skip items that already match before writing.
    async fn existing_content_hash(&self, document_uuid: Uuid) -> Result<Option<String>, PipelineError>;

    /// Write content to the destination, returning the destination's
    /// provider-local id for the written content.
    async fn write(&self, document_uuid: Uuid, content: &str) -> Result<String, PipelineError>;

    /// Re-read the content hash immediately after a write, so the caller
    /// can verify the write actually took before marking the item complete.
    async fn read_back_hash(&self, document_uuid: Uuid) -> Result<String, PipelineError>;
}

/// Source-side capability required by the `move` strategy. Only sources
/// being migrated *from* need to support deleting content, so this is kept
/// separate from [`WorkspaceContentProvider`] rather than forcing every
/// content-fetching step to implement a no-op delete.
#[async_trait]
pub trait MigrationSource: WorkspaceContentProvider {
    /// Delete content from the source. Only called after a write to the
    /// destination has been verified by a matching read-back hash.
    async fn delete_content(&self, document_uuid: Uuid) -> Result<(), PipelineError>;
}

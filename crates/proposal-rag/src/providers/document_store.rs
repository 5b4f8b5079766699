//! Document store provider trait for proposal records and their blocks

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Document, DocumentClaim, KeyInformation, NewDocument, SemanticBlock};

/// Trait for document persistence
///
/// Implementations:
/// - `InMemoryDocumentStore`: process-local maps
#[async_trait]
pub trait DocumentStoreProvider: Send + Sync {
    /// Existing document with this content hash, if any
    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>>;

    /// Create a document, claiming its content hash. The check and the
    /// insert are atomic: when the hash is already claimed, processed or
    /// not, the existing record comes back and nothing is written.
    async fn create_document(&self, document: NewDocument) -> Result<DocumentClaim>;

    /// Flag a document as fully processed
    async fn mark_processed(&self, document_id: &Uuid) -> Result<()>;

    /// Remove a document, its blocks and its hash claim. Returns false for unknown ids.
    async fn delete_document(&self, document_id: &Uuid) -> Result<bool>;

    /// Insert blocks for a document. All or nothing per call.
    async fn insert_blocks(&self, document_id: &Uuid, blocks: &[SemanticBlock]) -> Result<usize>;

    async fn set_key_information(&self, document_id: &Uuid, info: KeyInformation) -> Result<()>;

    /// Fails with `DocumentNotFound` for unknown ids
    async fn get_document(&self, document_id: &Uuid) -> Result<Document>;

    async fn get_blocks(&self, document_id: &Uuid) -> Result<Vec<SemanticBlock>>;

    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

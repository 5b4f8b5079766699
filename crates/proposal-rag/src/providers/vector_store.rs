//! Vector store provider trait for section-scoped similarity search

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::Result;
use crate::types::BlockType;

/// Free-form metadata stored next to each vector; filters match on it
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which index an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexScope {
    /// Whole-document text
    Document,
    /// One index per block type
    Block(BlockType),
}

impl IndexScope {
    /// Parse "document" or a block type name
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase();
        if normalized == "document" || normalized == "documents" {
            return Some(IndexScope::Document);
        }
        BlockType::ALL
            .iter()
            .find(|t| t.as_str() == normalized)
            .map(|t| IndexScope::Block(*t))
    }
}

impl fmt::Display for IndexScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexScope::Document => f.write_str("document"),
            IndexScope::Block(block_type) => write!(f, "{}", block_type),
        }
    }
}

/// Search result from the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub content: String,
    pub metadata: Metadata,
    /// In (0, 1]; 1 means identical embeddings
    pub similarity_score: f32,
    pub scope: String,
}

/// Entry counts per index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStats {
    pub documents: usize,
    /// Keyed by block type name
    pub blocks: BTreeMap<String, usize>,
    pub total: usize,
}

/// Trait for vector storage and similarity search
///
/// Implementations:
/// - `InMemoryVectorStore`: flat in-process indexes, one per scope
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Embed `text` into the document index
    async fn add(&self, text: &str, metadata: Metadata) -> Result<Uuid>;

    /// Embed `text` into the index for `block_type`
    async fn add_scoped(&self, block_type: BlockType, text: &str, metadata: Metadata) -> Result<Uuid>;

    /// Nearest neighbours of `query` in `scope` (the document index when
    /// `None`), keeping only entries whose metadata equals every filter
    async fn search(
        &self,
        query: &str,
        k: usize,
        scope: Option<IndexScope>,
        filters: Option<&Metadata>,
    ) -> Result<Vec<SearchHit>>;

    /// Blocks of one type similar to `content`, at or above `threshold`
    async fn search_similar_blocks(
        &self,
        content: &str,
        block_type: BlockType,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let hits = self
            .search(content, k, Some(IndexScope::Block(block_type)), None)
            .await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.similarity_score >= threshold)
            .collect())
    }

    /// Drop every entry whose `document_id` metadata equals `document_id`,
    /// across all scopes. Returns the number removed.
    async fn remove_document(&self, document_id: &Uuid) -> Result<usize>;

    async fn stats(&self) -> Result<VectorStats>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_names() {
        assert_eq!(IndexScope::parse("Document"), Some(IndexScope::Document));
        assert_eq!(
            IndexScope::parse("investment"),
            Some(IndexScope::Block(BlockType::Investment))
        );
        assert_eq!(IndexScope::parse("appendix"), None);
        assert_eq!(IndexScope::Block(BlockType::Scope).to_string(), "scope");
    }
}

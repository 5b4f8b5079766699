//! In-process provider implementations
//!
//! Flat vector indexes per scope and DashMap-backed document records. Both
//! are lost on restart.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{BlockType, Document, DocumentClaim, KeyInformation, NewDocument, SemanticBlock};

use super::document_store::DocumentStoreProvider;
use super::embedding::EmbeddingProvider;
use super::vector_store::{IndexScope, Metadata, SearchHit, VectorStats, VectorStoreProvider};

struct IndexEntry {
    id: Uuid,
    content: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

/// Exact nearest-neighbour search over in-memory vectors
pub struct InMemoryVectorStore {
    embedder: Arc<dyn EmbeddingProvider>,
    indexes: RwLock<HashMap<IndexScope, Vec<IndexEntry>>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    async fn insert(&self, scope: IndexScope, text: &str, metadata: Metadata) -> Result<Uuid> {
        let embedding = self.embedder.embed(text).await?;
        if embedding.len() != self.embedder.dimensions() {
            return Err(Error::vector_db(format!(
                "Embedding has {} dimensions, index expects {}",
                embedding.len(),
                self.embedder.dimensions()
            )));
        }

        let id = Uuid::new_v4();
        self.indexes.write().entry(scope).or_default().push(IndexEntry {
            id,
            content: text.to_string(),
            metadata,
            embedding,
        });
        tracing::debug!("Indexed {} chars into {} index", text.len(), scope);
        Ok(id)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn matches_filters(metadata: &Metadata, filters: Option<&Metadata>) -> bool {
    filters.map_or(true, |filters| {
        filters
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    })
}

#[async_trait]
impl VectorStoreProvider for InMemoryVectorStore {
    async fn add(&self, text: &str, metadata: Metadata) -> Result<Uuid> {
        self.insert(IndexScope::Document, text, metadata).await
    }

    async fn add_scoped(&self, block_type: BlockType, text: &str, metadata: Metadata) -> Result<Uuid> {
        self.insert(IndexScope::Block(block_type), text, metadata).await
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        scope: Option<IndexScope>,
        filters: Option<&Metadata>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let scope = scope.unwrap_or(IndexScope::Document);
        let query_embedding = self.embedder.embed(query).await?;

        let indexes = self.indexes.read();
        let Some(entries) = indexes.get(&scope) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &IndexEntry)> = entries
            .iter()
            .filter(|entry| matches_filters(&entry.metadata, filters))
            .map(|entry| (squared_l2(&query_embedding, &entry.embedding), entry))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, entry)| SearchHit {
                id: entry.id,
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
                similarity_score: 1.0 / (1.0 + distance),
                scope: scope.to_string(),
            })
            .collect())
    }

    async fn remove_document(&self, document_id: &Uuid) -> Result<usize> {
        let owner = serde_json::Value::String(document_id.to_string());
        let mut indexes = self.indexes.write();
        let mut removed = 0;
        for entries in indexes.values_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.metadata.get("document_id") != Some(&owner));
            removed += before - entries.len();
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<VectorStats> {
        let indexes = self.indexes.read();
        let mut stats = VectorStats::default();
        for (scope, entries) in indexes.iter() {
            match scope {
                IndexScope::Document => stats.documents = entries.len(),
                IndexScope::Block(block_type) => {
                    stats.blocks.insert(block_type.to_string(), entries.len());
                }
            }
            stats.total += entries.len();
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool> {
        self.embedder.health_check().await
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Document records, blocks and a content-hash index
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: DashMap<Uuid, Document>,
    by_hash: DashMap<String, Uuid>,
    blocks: DashMap<Uuid, Vec<SemanticBlock>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentStoreProvider for InMemoryDocumentStore {
    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let Some(id) = self.by_hash.get(content_hash).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.documents.get(&id).map(|doc| doc.clone()))
    }

    async fn create_document(&self, document: NewDocument) -> Result<DocumentClaim> {
        // The hash entry is held while the record is written so concurrent
        // uploads of the same bytes resolve to one owner
        match self.by_hash.entry(document.content_hash.clone()) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                self.documents
                    .get(&id)
                    .map(|doc| DocumentClaim::Existing(doc.clone()))
                    .ok_or_else(|| Error::storage(format!("Hash index points at missing document {}", id)))
            }
            Entry::Vacant(slot) => {
                let id = Uuid::new_v4();
                self.documents.insert(
                    id,
                    Document {
                        id,
                        filename: document.filename,
                        content_hash: document.content_hash,
                        content: document.content,
                        client_name: document.client_name,
                        industry: document.industry,
                        total_pages: document.total_pages,
                        ocr_pages: document.ocr_pages,
                        formatting: document.formatting,
                        key_information: None,
                        processed: false,
                        created_at: Utc::now(),
                    },
                );
                slot.insert(id);
                Ok(DocumentClaim::Created(id))
            }
        }
    }

    async fn insert_blocks(&self, document_id: &Uuid, blocks: &[SemanticBlock]) -> Result<usize> {
        if !self.documents.contains_key(document_id) {
            return Err(Error::DocumentNotFound(document_id.to_string()));
        }
        if let Some(stray) = blocks.iter().find(|b| b.document_id != *document_id) {
            return Err(Error::storage(format!(
                "Block {} belongs to document {}, not {}",
                stray.id, stray.document_id, document_id
            )));
        }

        self.blocks
            .entry(*document_id)
            .or_default()
            .extend(blocks.iter().cloned());
        Ok(blocks.len())
    }

    async fn mark_processed(&self, document_id: &Uuid) -> Result<()> {
        let mut document = self
            .documents
            .get_mut(document_id)
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))?;
        document.processed = true;
        Ok(())
    }

    async fn delete_document(&self, document_id: &Uuid) -> Result<bool> {
        let Some((_, document)) = self.documents.remove(document_id) else {
            return Ok(false);
        };
        self.by_hash
            .remove_if(&document.content_hash, |_, owner| owner == document_id);
        self.blocks.remove(document_id);
        Ok(true)
    }

    async fn set_key_information(&self, document_id: &Uuid, info: KeyInformation) -> Result<()> {
        let mut document = self
            .documents
            .get_mut(document_id)
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))?;
        document.key_information = Some(info);
        Ok(())
    }

    async fn get_document(&self, document_id: &Uuid) -> Result<Document> {
        self.documents
            .get(document_id)
            .map(|doc| doc.clone())
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))
    }

    async fn get_blocks(&self, document_id: &Uuid) -> Result<Vec<SemanticBlock>> {
        if !self.documents.contains_key(document_id) {
            return Err(Error::DocumentNotFound(document_id.to_string()));
        }
        Ok(self
            .blocks
            .get(document_id)
            .map(|blocks| blocks.clone())
            .unwrap_or_default())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self.documents.iter().map(|d| d.value().clone()).collect();
        documents.sort_by_key(|d| d.created_at);
        Ok(documents)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HashEmbedder;
    use crate::types::{BlockFormatting, LanguagePatterns, NlpInsights};
    use serde_json::json;

    fn store() -> InMemoryVectorStore {
        InMemoryVectorStore::new(Arc::new(HashEmbedder::new(128)))
    }

    fn meta(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    fn new_document(hash: &str) -> NewDocument {
        NewDocument {
            filename: "proposal.pdf".to_string(),
            content_hash: hash.to_string(),
            content: "Proposal text".to_string(),
            client_name: Some("Acme".to_string()),
            industry: None,
            total_pages: 1,
            ocr_pages: 0,
            formatting: Vec::new(),
        }
    }

    fn block(document_id: Uuid) -> SemanticBlock {
        SemanticBlock {
            id: Uuid::new_v4(),
            document_id,
            block_type: BlockType::Scope,
            section_name: "scope".to_string(),
            content: "Two APIs".to_string(),
            start_pos: 0,
            end_pos: 8,
            confidence: 0.8,
            language_patterns: LanguagePatterns::default(),
            formatting: BlockFormatting::default(),
            nlp_insights: NlpInsights::default(),
        }
    }

    #[tokio::test]
    async fn test_exact_match_ranks_first_with_similarity_one() {
        let store = store();
        store.add("cloud migration plan", Metadata::new()).await.unwrap();
        store.add("catering invoice", Metadata::new()).await.unwrap();

        let hits = store.search("cloud migration plan", 2, None, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "cloud migration plan");
        assert!((hits[0].similarity_score - 1.0).abs() < 1e-6);
        assert!(hits[1].similarity_score < hits[0].similarity_score);
        assert!(hits[1].similarity_score > 0.0);
    }

    #[tokio::test]
    async fn test_scopes_are_separate() {
        let store = store();
        store
            .add_scoped(BlockType::Timeline, "six week rollout", Metadata::new())
            .await
            .unwrap();

        assert!(store.search("six week rollout", 5, None, None).await.unwrap().is_empty());
        let hits = store
            .search("six week rollout", 5, Some(IndexScope::Block(BlockType::Timeline)), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scope, "timeline");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.blocks["timeline"], 1);
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn test_filters_apply_before_top_k() {
        let store = store();
        store
            .add("cloud migration", meta(json!({"client": "Acme"})))
            .await
            .unwrap();
        store
            .add("billing platform", meta(json!({"client": "Globex"})))
            .await
            .unwrap();

        let filters = meta(json!({"client": "Globex"}));
        let hits = store
            .search("cloud migration", 1, None, Some(&filters))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "billing platform");
    }

    #[tokio::test]
    async fn test_remove_document_clears_every_scope() {
        let store = store();
        let kept = Uuid::new_v4();
        let dropped = Uuid::new_v4();
        store
            .add("kept proposal", meta(json!({"document_id": kept.to_string()})))
            .await
            .unwrap();
        store
            .add("dropped proposal", meta(json!({"document_id": dropped.to_string()})))
            .await
            .unwrap();
        store
            .add_scoped(
                BlockType::Scope,
                "dropped scope",
                meta(json!({"document_id": dropped.to_string()})),
            )
            .await
            .unwrap();

        assert_eq!(store.remove_document(&dropped).await.unwrap(), 2);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn test_similar_blocks_threshold() {
        let store = store();
        store
            .add_scoped(BlockType::Solution, "managed kubernetes cluster", Metadata::new())
            .await
            .unwrap();
        store
            .add_scoped(BlockType::Solution, "on-site staff training", Metadata::new())
            .await
            .unwrap();

        let hits = store
            .search_similar_blocks("managed kubernetes cluster", BlockType::Solution, 5, 0.99)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "managed kubernetes cluster");
    }

    async fn create(store: &InMemoryDocumentStore, hash: &str) -> Uuid {
        match store.create_document(new_document(hash)).await.unwrap() {
            DocumentClaim::Created(id) => id,
            DocumentClaim::Existing(doc) => panic!("hash {} already claimed by {}", hash, doc.id),
        }
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let store = InMemoryDocumentStore::new();
        let id = create(&store, "abc").await;

        assert_eq!(store.find_by_hash("abc").await.unwrap().unwrap().id, id);
        assert!(store.find_by_hash("other").await.unwrap().is_none());
        match store.create_document(new_document("abc")).await.unwrap() {
            DocumentClaim::Existing(existing) => assert_eq!(existing.id, id),
            other => panic!("expected the existing record, got {:?}", other),
        }
        assert_eq!(store.len(), 1);
        assert!(!store.get_document(&id).await.unwrap().processed);

        store
            .set_key_information(&id, KeyInformation::default())
            .await
            .unwrap();
        store.mark_processed(&id).await.unwrap();
        let document = store.get_document(&id).await.unwrap();
        assert!(document.key_information.is_some());
        assert!(document.processed);
    }

    #[tokio::test]
    async fn test_delete_releases_hash() {
        let store = InMemoryDocumentStore::new();
        let id = create(&store, "abc").await;
        store.insert_blocks(&id, &[block(id)]).await.unwrap();

        assert!(store.delete_document(&id).await.unwrap());
        assert!(!store.delete_document(&id).await.unwrap());
        assert!(store.find_by_hash("abc").await.unwrap().is_none());
        assert!(store.get_blocks(&id).await.is_err());

        let again = create(&store, "abc").await;
        assert_ne!(again, id);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_owner() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create_document(new_document("same")).await.unwrap() })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), DocumentClaim::Created(_)) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_blocks_is_all_or_nothing() {
        let store = InMemoryDocumentStore::new();
        let id = create(&store, "abc").await;

        let mixed = vec![block(id), block(Uuid::new_v4())];
        assert!(matches!(
            store.insert_blocks(&id, &mixed).await,
            Err(Error::Storage(_))
        ));
        assert!(store.get_blocks(&id).await.unwrap().is_empty());

        assert_eq!(store.insert_blocks(&id, &[block(id)]).await.unwrap(), 1);
        assert_eq!(store.get_blocks(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let store = InMemoryDocumentStore::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.get_document(&missing).await,
            Err(Error::DocumentNotFound(_))
        ));
        assert!(store.insert_blocks(&missing, &[]).await.is_err());
    }
}

//! Provider abstractions for embeddings, section classification, vector search,
//! and document persistence
//!
//! The pipeline only talks to these traits. Local implementations keep
//! everything in memory; the Ollama implementations call a local server.

pub mod document_store;
pub mod embedding;
pub mod llm;
pub mod local;
pub mod ollama;
pub mod vector_store;

pub use document_store::DocumentStoreProvider;
pub use embedding::{EmbeddingProvider, HashEmbedder};
pub use llm::{parse_section_response, Classification, SectionClassifier};
pub use local::{InMemoryDocumentStore, InMemoryVectorStore};
pub use ollama::{OllamaClassifier, OllamaClient, OllamaEmbedder};
pub use vector_store::{IndexScope, Metadata, SearchHit, VectorStats, VectorStoreProvider};

//! proposal-rag: PDF proposal ingestion with staged progress tracking
//!
//! Uploaded proposals flow through six tracked stages: extraction, OCR
//! fallback, pattern detection, LLM section identification, block
//! persistence and vector indexing. Batch fan-out, retries, caching and
//! memory-aware chunking live in [`processing`]; external services sit
//! behind the traits in [`providers`].

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod server;
pub mod storage;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use processing::{
    JobRegistry, PdfPipeline, PipelineOutcome, ProgressTracker, StageStatus, Upload,
};
pub use types::{BlockType, Document, SemanticBlock};

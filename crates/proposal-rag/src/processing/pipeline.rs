//! Six-stage PDF proposal pipeline
//!
//! [`PdfPipeline::run`] drives one upload through extraction, section
//! identification, key-information extraction, vector indexing, metadata
//! storage and finalization, reporting every transition on the job's
//! [`ProgressTracker`]. Stage errors are caught here and only here: the
//! failing stage is marked `error` and the job is still completed.

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{EmbeddingBackend, RagConfig};
use crate::error::{Error, Result};
use crate::ingestion::{
    detect_patterns, DisabledOcr, LopdfBackend, NlpAnalyzer, OcrEngine, PdfBackend, RawPdf,
    TesseractOcr, TextChunk, TextChunker,
};
use crate::providers::{
    Classification, DocumentStoreProvider, EmbeddingProvider, HashEmbedder, InMemoryDocumentStore,
    InMemoryVectorStore, Metadata, OllamaClassifier, OllamaEmbedder, SectionClassifier,
    VectorStoreProvider,
};
use crate::storage::{ProposalSidecar, SidecarStore};
use crate::types::{
    BlockFormatting, BlockType, DocumentClaim, ExtractedDocument, LanguagePatterns, NewDocument,
    OcrStatus, PageContent, SemanticBlock,
};

use super::batch::{BatchProcessor, BatchStats};
use super::cache::{content_key, CacheManager, CacheStats};
use super::memory::MemoryMonitor;
use super::optimizer::{ChunkStrategy, DatasetOptimizer, OptimizerStats};
use super::retry::RetryPolicy;
use super::tracker::ProgressTracker;

/// One uploaded file
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Bytes,
    pub client_name: Option<String>,
    pub industry: Option<String>,
    /// Where the upload was saved, recorded in the sidecar
    pub file_path: Option<PathBuf>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
            client_name: None,
            industry: None,
            file_path: None,
        }
    }

    pub fn with_client(mut self, client_name: Option<String>, industry: Option<String>) -> Self {
        self.client_name = client_name;
        self.industry = industry;
        self
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Processed {
        document_id: Uuid,
        proposal_id: Uuid,
        blocks: usize,
        indexed_blocks: usize,
    },
    /// Same bytes were processed before, or are being processed by another job
    Duplicate { document_id: Uuid },
    Failed {
        stage: Option<String>,
        error: String,
    },
}

/// External services the pipeline calls
pub struct Collaborators {
    pub backend: Arc<dyn PdfBackend>,
    pub ocr: Arc<dyn OcrEngine>,
    pub classifier: Arc<dyn SectionClassifier>,
    pub vectors: Arc<dyn VectorStoreProvider>,
    pub documents: Arc<dyn DocumentStoreProvider>,
    pub sidecars: SidecarStore,
}

impl Collaborators {
    /// Local stores plus Ollama classification, as configured
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let ocr: Arc<dyn OcrEngine> = if config.pipeline.ocr_enabled && TesseractOcr::is_available() {
            Arc::new(TesseractOcr::new(config.pipeline.ocr_language.clone()))
        } else {
            if config.pipeline.ocr_enabled {
                tracing::warn!("pdftoppm/tesseract not found; OCR fallback disabled");
            }
            Arc::new(DisabledOcr)
        };

        let embedder: Arc<dyn EmbeddingProvider> = match config.embeddings.backend {
            EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(config.embeddings.dimensions)),
            EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(
                &config.llm,
                config.embeddings.dimensions,
            )?),
        };

        Ok(Self {
            backend: Arc::new(LopdfBackend::default()),
            ocr,
            classifier: Arc::new(OllamaClassifier::new(&config.llm)?),
            vectors: Arc::new(InMemoryVectorStore::new(embedder)),
            documents: Arc::new(InMemoryDocumentStore::new()),
            sidecars: SidecarStore::new(config.storage.sidecar_dir.clone()),
        })
    }
}

/// Counters of every processor the pipeline owns
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub ocr_batches: BatchStats,
    pub classification_batches: BatchStats,
    pub extraction_cache: CacheStats,
    pub pattern_cache: CacheStats,
    pub classification_cache: CacheStats,
    pub optimizer: OptimizerStats,
}

type PatternCache = CacheManager<String, LanguagePatterns>;

/// Orchestrates the six processing stages for uploaded proposals
pub struct PdfPipeline {
    backend: Arc<dyn PdfBackend>,
    ocr: Arc<dyn OcrEngine>,
    classifier: Arc<dyn SectionClassifier>,
    vectors: Arc<dyn VectorStoreProvider>,
    documents: Arc<dyn DocumentStoreProvider>,
    sidecars: SidecarStore,
    extraction_cache: Arc<CacheManager<String, Arc<ExtractedDocument>>>,
    pattern_cache: Arc<PatternCache>,
    classification_cache: Arc<CacheManager<String, Classification>>,
    ocr_batches: BatchProcessor<u32>,
    classification_batches: BatchProcessor<TextChunk>,
    optimizer: DatasetOptimizer,
    chunker: TextChunker,
    nlp: NlpAnalyzer,
    retry: RetryPolicy,
    confidence_threshold: f32,
    default_confidence: f32,
    stage_delay: std::time::Duration,
}

impl PdfPipeline {
    pub fn new(config: &RagConfig, collaborators: Collaborators) -> Self {
        let cache = &config.cache;
        let extraction_cache = Arc::new(CacheManager::with_sizer(
            "extraction",
            cache.extraction_max_items,
            cache.max_memory_bytes,
            Arc::new(|doc: &Arc<ExtractedDocument>| {
                doc.content.len() + doc.pages.iter().map(|p| p.text.len()).sum::<usize>()
            }),
        ));
        let pattern_cache = Arc::new(CacheManager::new(
            "patterns",
            cache.pattern_max_items,
            cache.max_memory_bytes,
        ));
        let classification_cache = Arc::new(CacheManager::with_sizer(
            "classification",
            cache.classification_max_items,
            cache.max_memory_bytes,
            Arc::new(|c: &Classification| match c {
                Classification::Sections { sections, .. } => {
                    sections.iter().map(|(k, v)| k.len() + v.len()).sum()
                }
                Classification::Malformed(raw) => raw.len(),
            }),
        ));

        let memory = Arc::new(MemoryMonitor::new(config.batch.memory_threshold_percent));
        {
            let extraction = extraction_cache.clone();
            let patterns = pattern_cache.clone();
            let classification = classification_cache.clone();
            memory.add_relief_hook(Arc::new(move || {
                extraction.clear();
                patterns.clear();
                classification.clear();
                tracing::warn!("Cleared pipeline caches to relieve memory pressure");
            }));
        }

        Self {
            backend: collaborators.backend,
            ocr: collaborators.ocr,
            classifier: collaborators.classifier,
            vectors: collaborators.vectors,
            documents: collaborators.documents,
            sidecars: collaborators.sidecars,
            extraction_cache,
            pattern_cache,
            classification_cache,
            ocr_batches: BatchProcessor::new(&config.batch).with_memory_monitor(memory.clone()),
            classification_batches: BatchProcessor::new(&config.batch).with_memory_monitor(memory),
            optimizer: DatasetOptimizer::new(&config.optimizer),
            chunker: TextChunker::new(
                config.pipeline.text_chunk_size,
                config.pipeline.text_chunk_overlap,
            ),
            nlp: NlpAnalyzer::default(),
            retry: RetryPolicy::from_config(&config.pipeline),
            confidence_threshold: config.pipeline.confidence_threshold,
            default_confidence: config.pipeline.default_confidence,
            stage_delay: config.pipeline.stage_delay(),
        }
    }

    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Ok(Self::new(config, Collaborators::from_config(config)?))
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStoreProvider> {
        &self.documents
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStoreProvider> {
        &self.vectors
    }

    pub fn classifier(&self) -> &Arc<dyn SectionClassifier> {
        &self.classifier
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            ocr_batches: self.ocr_batches.stats(),
            classification_batches: self.classification_batches.stats(),
            extraction_cache: self.extraction_cache.stats(),
            pattern_cache: self.pattern_cache.stats(),
            classification_cache: self.classification_cache.stats(),
            optimizer: self.optimizer.stats(),
        }
    }

    /// Run the pipeline on a background task
    pub fn spawn(self: &Arc<Self>, tracker: Arc<ProgressTracker>, upload: Upload) -> JoinHandle<PipelineOutcome> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run(tracker, upload).await })
    }

    /// Drive `upload` through every stage of `tracker` and complete the job
    pub async fn run(&self, tracker: Arc<ProgressTracker>, upload: Upload) -> PipelineOutcome {
        tracing::info!(
            "[{}] Processing job {} ({} bytes)",
            upload.filename,
            tracker.id(),
            upload.data.len()
        );

        let mut claimed = None;
        let outcome = match self.run_stages(&tracker, &upload, &mut claimed).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let stage = tracker.current_stage().map(|s| s.name);
                tracing::error!(
                    "[{}] Stage {} failed: {}",
                    upload.filename,
                    stage.as_deref().unwrap_or("<none>"),
                    e
                );
                tracker.fail_current_stage(&e.to_string(), Some(&format!("Error: {}", e)));
                if let Some(document_id) = claimed {
                    self.release(&upload.filename, document_id).await;
                }
                PipelineOutcome::Failed {
                    stage,
                    error: e.to_string(),
                }
            }
        };

        tracker.complete_job();
        tracing::info!("[{}] Job {} complete", upload.filename, tracker.id());
        outcome
    }

    /// Drop the partial record of a failed run so the same bytes can be uploaded again
    async fn release(&self, filename: &str, document_id: Uuid) {
        match self.vectors.remove_document(&document_id).await {
            Ok(removed) if removed > 0 => {
                tracing::debug!("[{}] Removed {} index entries", filename, removed)
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("[{}] Failed to remove index entries: {}", filename, e),
        }
        match self.documents.delete_document(&document_id).await {
            Ok(_) => tracing::info!("[{}] Released partial document {}", filename, document_id),
            Err(e) => tracing::warn!("[{}] Failed to release document {}: {}", filename, document_id, e),
        }
    }

    /// `claimed` is set once this run owns a document record
    async fn run_stages(
        &self,
        tracker: &ProgressTracker,
        upload: &Upload,
        claimed: &mut Option<Uuid>,
    ) -> Result<PipelineOutcome> {
        let filename = upload.filename.as_str();

        // 1. Text extraction
        tracker.start_next_stage(Some(&format!("Starting text extraction for {}", filename)));
        let content_hash = content_key(&upload.data);
        if let Some(existing) = self.documents.find_by_hash(&content_hash).await? {
            if existing.processed {
                return Ok(duplicate(tracker, filename, existing.id));
            }
            tracing::debug!(
                "[{}] Document {} is still being processed by another job",
                filename,
                existing.id
            );
        }

        let extracted = match self.extraction_cache.get(&content_hash) {
            Some(hit) => {
                tracing::debug!("[{}] Extraction cache hit", filename);
                hit
            }
            None => {
                let extracted = self
                    .retry
                    .run("PDF parsing", || self.extract(upload, &content_hash))
                    .await?;
                let extracted = Arc::new(extracted);
                self.extraction_cache.set(content_hash.clone(), extracted.clone());
                extracted
            }
        };
        if extracted.content.trim().is_empty() {
            return Err(Error::file_parse(filename, "No text could be extracted"));
        }

        let claim = self
            .documents
            .create_document(NewDocument::from_extracted(
                filename,
                &extracted,
                upload.client_name.clone(),
                upload.industry.clone(),
            ))
            .await?;
        let document_id = match claim {
            DocumentClaim::Created(id) => id,
            DocumentClaim::Existing(existing) => return Ok(duplicate(tracker, filename, existing.id)),
        };
        *claimed = Some(document_id);
        self.finish_stage(
            tracker,
            &format!(
                "Extracted {} characters from {} pages ({} via OCR)",
                extracted.content.len(),
                extracted.total_pages,
                extracted.ocr_pages()
            ),
        )
        .await;

        // 2. Section identification
        tracker.start_next_stage(Some("Analyzing document structure"));
        let blocks = self
            .retry
            .run("Section identification", || {
                self.identify_sections(filename, document_id, &extracted)
            })
            .await?;
        if let Err(e) = self.documents.insert_blocks(&document_id, &blocks).await {
            tracing::error!("[{}] Failed to store {} blocks: {}", filename, blocks.len(), e);
        }
        self.finish_stage(tracker, &format!("Identified {} sections", blocks.len()))
            .await;

        // 3. Key information
        tracker.start_next_stage(Some("Extracting key information"));
        let nlp = self.nlp.clone();
        let content = extracted.content.clone();
        let key_information = tokio::task::spawn_blocking(move || nlp.extract_key_information(&content))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?;
        let keyword_count = key_information.key_phrases.len();
        let entity_count = key_information.entity_count();
        let info_count = key_information.item_count();
        self.documents
            .set_key_information(&document_id, key_information)
            .await?;
        self.finish_stage(
            tracker,
            &format!("Extracted {} key information items", info_count),
        )
        .await;

        // 4. Vector indexing
        tracker.start_next_stage(Some("Indexing content for similarity search"));
        let indexed_blocks = self
            .index(upload, document_id, &extracted.content, &blocks)
            .await?;
        self.finish_stage(
            tracker,
            &format!("Indexed document and {} sections", indexed_blocks),
        )
        .await;

        // 5. Metadata storage
        tracker.start_next_stage(Some("Storing metadata"));
        let now = Utc::now();
        let sidecar = ProposalSidecar {
            id: Uuid::new_v4(),
            document_id,
            filename: filename.to_string(),
            client_name: upload.client_name.clone(),
            industry: upload.industry.clone(),
            date: now.format("%Y-%m-%d").to_string(),
            status: "processed".to_string(),
            content: extracted.content.clone(),
            sections: sections_by_type(&blocks),
            upload_time: now,
            file_path: upload
                .file_path
                .as_ref()
                .map(|p| p.display().to_string()),
            section_count: blocks.len(),
            keyword_count,
            entity_count,
        };
        self.sidecars.write(&sidecar).await?;
        self.finish_stage(tracker, "Metadata stored").await;

        // 6. Finalization
        tracker.start_next_stage(Some("Finishing processing"));
        self.documents.mark_processed(&document_id).await?;
        tracker.complete_current_stage(Some("Document ready"));

        Ok(PipelineOutcome::Processed {
            document_id,
            proposal_id: sidecar.id,
            blocks: blocks.len(),
            indexed_blocks,
        })
    }

    async fn finish_stage(&self, tracker: &ProgressTracker, details: &str) {
        tracker.complete_current_stage(Some(details));
        if !self.stage_delay.is_zero() {
            tokio::time::sleep(self.stage_delay).await;
        }
    }

    /// Direct extraction, OCR for empty pages, then per-page patterns
    async fn extract(&self, upload: &Upload, content_hash: &str) -> Result<ExtractedDocument> {
        let backend = self.backend.clone();
        let data = upload.data.clone();
        let filename = upload.filename.clone();
        let raw: RawPdf = tokio::task::spawn_blocking(move || backend.extract(&filename, &data))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))??;

        let mut pages: Vec<PageContent> = raw
            .pages
            .into_iter()
            .map(|page| PageContent {
                page_number: page.page_number,
                ocr_status: OcrStatus::NotNeeded,
                text: page.text,
                char_offset: 0,
                formatting: page.formatting,
                patterns: LanguagePatterns::default(),
            })
            .collect();

        self.ocr_empty_pages(upload, &mut pages).await;
        self.detect_page_patterns(&mut pages).await?;

        tracing::info!(
            "[{}] Extracted {} pages via {}",
            upload.filename,
            pages.len(),
            self.backend.name()
        );
        Ok(ExtractedDocument::from_pages(
            content_hash.to_string(),
            pages,
            raw.total_pages,
        ))
    }

    async fn ocr_empty_pages(&self, upload: &Upload, pages: &mut [PageContent]) {
        let empty: Vec<u32> = pages
            .iter()
            .filter(|p| p.text.trim().is_empty())
            .map(|p| p.page_number)
            .collect();
        if empty.is_empty() {
            return;
        }

        if !self.ocr.is_enabled() {
            for page in pages.iter_mut().filter(|p| p.text.trim().is_empty()) {
                page.ocr_status = OcrStatus::Disabled;
            }
            return;
        }

        tracing::warn!(
            "[{}] {} pages have no text layer; running {} OCR",
            upload.filename,
            empty.len(),
            self.ocr.name()
        );
        let ocr = self.ocr.clone();
        let data = upload.data.clone();
        let recognized = self
            .ocr_batches
            .process_batch(empty.clone(), move |page_number| ocr.recognize(&data, page_number))
            .await;

        let by_page: HashMap<u32, Option<String>> = empty.into_iter().zip(recognized).collect();
        for page in pages.iter_mut() {
            match by_page.get(&page.page_number) {
                Some(Some(text)) if !text.trim().is_empty() => {
                    page.text = text.clone();
                    page.ocr_status = OcrStatus::Applied;
                }
                Some(_) => {
                    tracing::warn!("[{}] OCR produced no text for page {}", upload.filename, page.page_number);
                    page.ocr_status = OcrStatus::Failed;
                }
                None => {}
            }
        }
    }

    async fn detect_page_patterns(&self, pages: &mut [PageContent]) -> Result<()> {
        let inputs: Vec<(u32, String)> = pages
            .iter()
            .map(|p| (p.page_number, p.text.clone()))
            .collect();
        let groups = self
            .optimizer
            .chunk_dataset(inputs, ChunkStrategy::Size, None)?;

        let cache = self.pattern_cache.clone();
        let detected: HashMap<u32, LanguagePatterns> = self
            .optimizer
            .process_chunks_blocking(
                groups,
                move |group| {
                    Ok(group
                        .into_iter()
                        .map(|(page_number, text)| (page_number, cached_patterns(&cache, &text)))
                        .collect::<Vec<(u32, LanguagePatterns)>>())
                },
                None,
            )
            .await
            .into_iter()
            .collect();

        for page in pages.iter_mut() {
            if let Some(patterns) = detected.get(&page.page_number) {
                page.patterns = patterns.clone();
            }
        }
        Ok(())
    }

    /// Classify every chunk and turn the sections into blocks. Fails only
    /// when every chunk failed, so the outer retry can try again.
    async fn identify_sections(
        &self,
        filename: &str,
        document_id: Uuid,
        extracted: &ExtractedDocument,
    ) -> Result<Vec<SemanticBlock>> {
        let chunks = self.chunker.chunk(&extracted.content);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!("[{}] Classifying {} chunks", filename, chunks.len());

        let results = self
            .classification_batches
            .process_batch_async(chunks.clone(), |chunk: TextChunk| {
                let classifier = self.classifier.clone();
                let cache = self.classification_cache.clone();
                async move {
                    let key = content_key(chunk.text.as_bytes());
                    if let Some(hit) = cache.get(&key) {
                        return Ok(hit);
                    }
                    let classification = classifier.classify(&chunk.text).await?;
                    if !classification.is_malformed() {
                        cache.set(key, classification.clone());
                    }
                    Ok(classification)
                }
            })
            .await;

        let failed = results.iter().filter(|r| r.is_none()).count();
        if failed == chunks.len() {
            return Err(Error::llm(format!(
                "section classification failed for all {} chunks",
                failed
            )));
        }
        if failed > 0 {
            tracing::warn!("[{}] {} of {} chunks yielded no sections", filename, failed, chunks.len());
        }

        let mut blocks: Vec<SemanticBlock> = Vec::new();
        let mut seen: HashMap<(BlockType, String), usize> = HashMap::new();
        for (chunk, result) in chunks.iter().zip(results) {
            let (sections, confidence) = match result {
                Some(Classification::Sections { sections, confidence }) => (sections, confidence),
                Some(Classification::Malformed(_)) => {
                    tracing::warn!("[{}] Chunk {} returned malformed output", filename, chunk.index);
                    continue;
                }
                None => continue,
            };

            for (section_name, content) in sections {
                let block = self.build_block(
                    document_id,
                    extracted,
                    chunk,
                    section_name,
                    content,
                    confidence.unwrap_or(self.default_confidence),
                );
                let key = (block.block_type, block.content.clone());
                match seen.get(&key) {
                    Some(&i) if blocks[i].confidence >= block.confidence => {}
                    Some(&i) => blocks[i] = block,
                    None => {
                        seen.insert(key, blocks.len());
                        blocks.push(block);
                    }
                }
            }
        }

        Ok(blocks)
    }

    fn build_block(
        &self,
        document_id: Uuid,
        extracted: &ExtractedDocument,
        chunk: &TextChunk,
        section_name: String,
        content: String,
        confidence: f32,
    ) -> SemanticBlock {
        let (start_pos, end_pos) = chunk
            .text
            .find(&content)
            .map(|i| chunk.start + i)
            .or_else(|| extracted.content.find(&content))
            .map(|start| (start, start + content.len()))
            .unwrap_or((chunk.start, chunk.end));

        let nlp_insights = self.nlp.insights(&content);
        let confidence = self.nlp.adjust_confidence(confidence, &nlp_insights);

        SemanticBlock {
            id: Uuid::new_v4(),
            document_id,
            block_type: BlockType::from_section_name(&section_name),
            section_name,
            language_patterns: cached_patterns(&self.pattern_cache, &content),
            formatting: block_formatting(&extracted.pages, start_pos, end_pos),
            content,
            start_pos,
            end_pos,
            confidence,
            nlp_insights,
        }
    }

    /// Index the document text and every block at or above the threshold,
    /// one write at a time
    async fn index(
        &self,
        upload: &Upload,
        document_id: Uuid,
        content: &str,
        blocks: &[SemanticBlock],
    ) -> Result<usize> {
        self.vectors
            .add(
                content,
                as_metadata(json!({
                    "document_id": document_id.to_string(),
                    "filename": upload.filename,
                    "client_name": upload.client_name,
                    "industry": upload.industry,
                })),
            )
            .await?;

        let mut indexed = 0;
        for block in blocks.iter().filter(|b| b.meets_threshold(self.confidence_threshold)) {
            self.vectors
                .add_scoped(
                    block.block_type,
                    &block.content,
                    as_metadata(json!({
                        "document_id": document_id.to_string(),
                        "block_id": block.id.to_string(),
                        "section_name": block.section_name,
                        "confidence": block.confidence,
                    })),
                )
                .await?;
            indexed += 1;
        }
        tracing::debug!(
            "[{}] Indexed {}/{} blocks at threshold {}",
            upload.filename,
            indexed,
            blocks.len(),
            self.confidence_threshold
        );
        Ok(indexed)
    }
}

fn duplicate(tracker: &ProgressTracker, filename: &str, document_id: Uuid) -> PipelineOutcome {
    tracing::info!("[{}] Duplicate of document {}; skipping", filename, document_id);
    skip_remaining(tracker, &format!("duplicate of {}", document_id));
    PipelineOutcome::Duplicate { document_id }
}

/// Skip the running stage and every stage after it
fn skip_remaining(tracker: &ProgressTracker, reason: &str) {
    tracker.skip_current_stage(Some(reason));
    while tracker.start_next_stage(None).is_some() {
        tracker.skip_current_stage(Some(reason));
    }
}

fn cached_patterns(cache: &PatternCache, text: &str) -> LanguagePatterns {
    cache.get_or_insert_with(content_key(text.as_bytes()), || detect_patterns(text))
}

fn as_metadata(value: serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

/// Fonts and layout flags of the pages a block spans
fn block_formatting(pages: &[PageContent], start: usize, end: usize) -> BlockFormatting {
    let mut formatting = BlockFormatting::default();
    let mut first = true;
    for page in pages {
        let page_end = page.char_offset + page.text.len();
        if page_end < start || page.char_offset > end {
            continue;
        }
        for span in &page.formatting.text_blocks {
            if !span.font.is_empty() {
                *formatting.fonts.entry(span.font.clone()).or_default() += 1;
            }
            *formatting
                .font_sizes
                .entry(format!("{:.1}", span.size))
                .or_default() += 1;
        }
        formatting.has_tables |= page.formatting.has_tables;
        formatting.has_images |= page.formatting.has_images;
        if first {
            formatting.layout_style = page.formatting.layout_style;
            first = false;
        }
    }
    formatting
}

/// Section text per block type, joined in document order
fn sections_by_type(blocks: &[SemanticBlock]) -> BTreeMap<String, String> {
    let mut ordered: Vec<&SemanticBlock> = blocks.iter().collect();
    ordered.sort_by_key(|b| b.start_pos);

    let mut sections: BTreeMap<String, String> = BTreeMap::new();
    for block in ordered {
        let entry = sections.entry(block.block_type.to_string()).or_default();
        if !entry.is_empty() {
            entry.push_str("\n\n");
        }
        entry.push_str(&block.content);
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::registry::PDF_STAGES;
    use crate::processing::tracker::StageStatus;
    use crate::types::{LayoutStyle, PageFormatting, TextSpan};

    fn page(number: u32, offset: usize, text: &str, font: &str, layout: LayoutStyle) -> PageContent {
        PageContent {
            page_number: number,
            text: text.to_string(),
            char_offset: offset,
            ocr_status: OcrStatus::NotNeeded,
            formatting: PageFormatting {
                text_blocks: vec![TextSpan {
                    text: text.to_string(),
                    font: font.to_string(),
                    size: 12.0,
                }],
                has_tables: layout == LayoutStyle::Table,
                has_images: false,
                layout_style: layout,
            },
            patterns: LanguagePatterns::default(),
        }
    }

    fn block(block_type: BlockType, content: &str, start_pos: usize) -> SemanticBlock {
        SemanticBlock {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            block_type,
            section_name: block_type.to_string(),
            content: content.to_string(),
            start_pos,
            end_pos: start_pos + content.len(),
            confidence: 0.8,
            language_patterns: LanguagePatterns::default(),
            formatting: BlockFormatting::default(),
            nlp_insights: Default::default(),
        }
    }

    #[test]
    fn test_block_formatting_covers_spanned_pages() {
        let pages = vec![
            page(1, 0, "Intro page", "F1", LayoutStyle::Text),
            page(2, 11, "Pricing table", "F2", LayoutStyle::Table),
            page(3, 25, "Appendix", "F3", LayoutStyle::Text),
        ];

        let formatting = block_formatting(&pages, 5, 20);
        assert_eq!(formatting.fonts.len(), 2);
        assert!(formatting.fonts.contains_key("F1"));
        assert!(formatting.fonts.contains_key("F2"));
        assert_eq!(formatting.font_sizes["12.0"], 2);
        assert!(formatting.has_tables);
        assert_eq!(formatting.layout_style, LayoutStyle::Text);
    }

    #[test]
    fn test_sections_grouped_in_document_order() {
        let blocks = vec![
            block(BlockType::Scope, "Second scope item", 50),
            block(BlockType::Scope, "First scope item", 10),
            block(BlockType::Title, "Cloud Proposal", 0),
        ];

        let sections = sections_by_type(&blocks);
        assert_eq!(sections["scope"], "First scope item\n\nSecond scope item");
        assert_eq!(sections["title"], "Cloud Proposal");
    }

    #[test]
    fn test_skip_remaining_finishes_every_stage() {
        let tracker = ProgressTracker::new("dup.pdf");
        for (name, description, weight) in PDF_STAGES {
            tracker.add_stage(name, description, weight);
        }
        tracker.start_next_stage(None);
        skip_remaining(&tracker, "duplicate of 123");

        let snapshot = tracker.snapshot();
        assert!(snapshot.steps.iter().all(|s| s.status == StageStatus::Skipped));
        assert_eq!(snapshot.overall_progress, 100.0);
    }

    #[test]
    fn test_upload_builder() {
        let upload = Upload::new("a.pdf", vec![1u8, 2, 3])
            .with_client(Some("Acme".into()), None)
            .with_file_path("/tmp/a.pdf");
        assert_eq!(upload.data.len(), 3);
        assert_eq!(upload.client_name.as_deref(), Some("Acme"));
        assert_eq!(upload.file_path, Some(PathBuf::from("/tmp/a.pdf")));
    }
}

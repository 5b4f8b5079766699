//! Document ingestion: PDF extraction, OCR fallback, chunking and text analysis

mod chunker;
mod nlp;
mod ocr;
mod patterns;
mod pdf;

pub use chunker::{TextChunk, TextChunker};
pub use nlp::{NlpAnalyzer, TextStructure};
pub use ocr::{DisabledOcr, OcrEngine, TesseractOcr};
pub use patterns::{detect_patterns, sentences};
pub use pdf::{analyze_operations, clean_page_text, LopdfBackend, PdfBackend, RawPage, RawPdf};

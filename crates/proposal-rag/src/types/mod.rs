//! Core types for the proposal pipeline

pub mod block;
pub mod document;

pub use block::{BlockFormatting, BlockType, NlpInsights, SemanticBlock};
pub use document::{
    Document, DocumentClaim, ExtractedDocument, KeyInformation, LanguagePatterns, LayoutStyle,
    NewDocument, OcrStatus, PageContent, PageFormatting, TechnicalTerm, TextSpan,
};

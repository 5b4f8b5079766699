//! Document types produced by extraction and owned by storage after persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// How a page's text was obtained
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    /// Direct text extraction produced content
    NotNeeded,
    /// Page had no text layer and OCR produced the content
    Applied,
    /// OCR ran but failed; page text is empty
    Failed,
    /// Page had no text layer and OCR is turned off
    Disabled,
}

/// Counts of surface-level language features in a span of text
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LanguagePatterns {
    pub bullet_points: usize,
    pub numbered_lists: usize,
    pub technical_terms: usize,
    pub monetary_values: usize,
    pub dates: usize,
    pub percentages: usize,
    pub sentence_count: usize,
    pub average_sentence_length: f64,
}

/// A run of text drawn with one font
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextSpan {
    pub text: String,
    /// Font resource name, e.g. `F1`
    pub font: String,
    pub size: f32,
}

/// Layout classification of a page
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LayoutStyle {
    #[default]
    Text,
    Table,
    Image,
    Mixed,
}

/// Formatting metadata for one page
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageFormatting {
    pub text_blocks: Vec<TextSpan>,
    pub has_tables: bool,
    pub has_images: bool,
    pub layout_style: LayoutStyle,
}

/// Content and metadata for a single page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    /// Page number (1-indexed)
    pub page_number: u32,
    /// Text content of the page
    pub text: String,
    /// Character offset in full document
    pub char_offset: usize,
    pub ocr_status: OcrStatus,
    pub formatting: PageFormatting,
    pub patterns: LanguagePatterns,
}

/// Result of the extraction stage, cached by content hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// SHA-256 of the raw upload bytes
    pub content_hash: String,
    /// Page texts joined with newlines
    pub content: String,
    pub pages: Vec<PageContent>,
    /// Pages reported by the PDF, including ones that failed to extract
    pub total_pages: u32,
}

impl ExtractedDocument {
    /// Join page texts and compute offsets
    pub fn from_pages(content_hash: String, mut pages: Vec<PageContent>, total_pages: u32) -> Self {
        pages.sort_by_key(|p| p.page_number);

        let mut content = String::new();
        for page in &mut pages {
            if !content.is_empty() {
                content.push('\n');
            }
            page.char_offset = content.len();
            content.push_str(&page.text);
        }

        Self {
            content_hash,
            content,
            pages,
            total_pages,
        }
    }

    /// Pages whose text came from OCR
    pub fn ocr_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.ocr_status == OcrStatus::Applied)
            .count()
    }
}

/// A technical term with surrounding context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechnicalTerm {
    pub term: String,
    pub context: String,
}

/// Document-level search and recommendation signals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyInformation {
    /// Entities grouped by label (MONEY, DATE, PERCENT, ORG, ACRONYM)
    pub entities: BTreeMap<String, Vec<String>>,
    pub key_phrases: Vec<String>,
    pub technical_terms: Vec<TechnicalTerm>,
}

impl KeyInformation {
    /// Distinct entities across all labels
    pub fn entity_count(&self) -> usize {
        self.entities.values().map(|v| v.len()).sum()
    }

    /// Count shown to users as "key information items"
    pub fn item_count(&self) -> usize {
        self.entity_count() + self.key_phrases.len()
    }
}

/// A persisted proposal document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub content_hash: String,
    pub content: String,
    pub client_name: Option<String>,
    pub industry: Option<String>,
    pub total_pages: u32,
    pub ocr_pages: usize,
    /// Formatting metadata per page, in page order
    pub formatting: Vec<PageFormatting>,
    pub key_information: Option<KeyInformation>,
    /// Set once every stage has finished; unfinished records are still owned by a running job
    #[serde(default)]
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of claiming a content hash when creating a document
#[derive(Debug, Clone)]
pub enum DocumentClaim {
    /// This caller owns the new record
    Created(Uuid),
    /// Another upload of the same bytes got there first
    Existing(Document),
}

/// Fields supplied when creating a document
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub content_hash: String,
    pub content: String,
    pub client_name: Option<String>,
    pub industry: Option<String>,
    pub total_pages: u32,
    pub ocr_pages: usize,
    pub formatting: Vec<PageFormatting>,
}

impl NewDocument {
    pub fn from_extracted(
        filename: &str,
        extracted: &ExtractedDocument,
        client_name: Option<String>,
        industry: Option<String>,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            content_hash: extracted.content_hash.clone(),
            content: extracted.content.clone(),
            client_name,
            industry,
            total_pages: extracted.total_pages,
            ocr_pages: extracted.ocr_pages(),
            formatting: extracted.pages.iter().map(|p| p.formatting.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, text: &str) -> PageContent {
        PageContent {
            page_number: number,
            text: text.to_string(),
            char_offset: 0,
            ocr_status: OcrStatus::NotNeeded,
            formatting: PageFormatting::default(),
            patterns: LanguagePatterns::default(),
        }
    }

    #[test]
    fn test_from_pages_orders_and_offsets() {
        let doc = ExtractedDocument::from_pages(
            "abc".to_string(),
            vec![page(2, "second"), page(1, "first")],
            2,
        );

        assert_eq!(doc.content, "first\nsecond");
        assert_eq!(doc.pages[0].char_offset, 0);
        assert_eq!(doc.pages[1].char_offset, 6);
        assert_eq!(&doc.content[doc.pages[1].char_offset..], "second");
    }
}

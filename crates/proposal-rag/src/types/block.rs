//! Semantic block types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::document::{LanguagePatterns, LayoutStyle};

/// Proposal section kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Title,
    Context,
    Problem,
    Solution,
    Scope,
    Timeline,
    Investment,
    Differentials,
    Other,
}

impl BlockType {
    /// Every block type, in declaration order
    pub const ALL: [BlockType; 9] = [
        BlockType::Title,
        BlockType::Context,
        BlockType::Problem,
        BlockType::Solution,
        BlockType::Scope,
        BlockType::Timeline,
        BlockType::Investment,
        BlockType::Differentials,
        BlockType::Other,
    ];

    /// Map a classifier section label to a block type.
    ///
    /// Matching is case-insensitive and accepts the common synonyms classifiers
    /// emit ("background" for context, "pricing" for investment, ...). Anything
    /// unrecognised becomes `Other`.
    pub fn from_section_name(name: &str) -> Self {
        let normalized = name.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "title" | "name" | "proposal_title" => Self::Title,
            "context" | "background" | "current_situation" => Self::Context,
            "problem" | "challenge" | "challenges" | "needs" | "pain_points" => Self::Problem,
            "solution" | "approach" | "proposed_solution" => Self::Solution,
            "scope" | "deliverables" | "project_scope" => Self::Scope,
            "timeline" | "schedule" | "roadmap" => Self::Timeline,
            "investment" | "pricing" | "price" | "cost" | "costs" | "budget" => Self::Investment,
            "differentials" | "differentiators" | "advantages" | "why_us" => Self::Differentials,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Context => "context",
            Self::Problem => "problem",
            Self::Solution => "solution",
            Self::Scope => "scope",
            Self::Timeline => "timeline",
            Self::Investment => "investment",
            Self::Differentials => "differentials",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NLP signals attached to a classified block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NlpInsights {
    pub key_phrases: Vec<String>,
    pub technical_terms: Vec<String>,
    pub complexity_score: f64,
}

/// Formatting aggregated over the pages a block spans
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockFormatting {
    pub fonts: BTreeMap<String, usize>,
    /// Keys are font sizes rendered with one decimal
    pub font_sizes: BTreeMap<String, usize>,
    pub has_tables: bool,
    pub has_images: bool,
    pub layout_style: LayoutStyle,
}

/// A classified span of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticBlock {
    pub id: Uuid,
    pub document_id: Uuid,
    pub block_type: BlockType,
    /// Label as emitted by the classifier
    pub section_name: String,
    pub content: String,
    /// Byte offsets into the document content
    pub start_pos: usize,
    pub end_pos: usize,
    pub confidence: f32,
    pub language_patterns: LanguagePatterns,
    pub formatting: BlockFormatting,
    pub nlp_insights: NlpInsights,
}

impl SemanticBlock {
    pub fn meets_threshold(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_names_map_to_block_types() {
        assert_eq!(BlockType::from_section_name("Solution"), BlockType::Solution);
        assert_eq!(BlockType::from_section_name(" pricing "), BlockType::Investment);
        assert_eq!(BlockType::from_section_name("Current Situation"), BlockType::Context);
        assert_eq!(BlockType::from_section_name("appendix"), BlockType::Other);
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&BlockType::Differentials).unwrap();
        assert_eq!(json, "\"differentials\"");
        for block_type in BlockType::ALL {
            assert_eq!(BlockType::from_section_name(block_type.as_str()), block_type);
        }
    }
}

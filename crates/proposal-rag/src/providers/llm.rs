//! Section classifier trait and response parsing

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;

/// Outcome of classifying one chunk of proposal text
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Section name to content, plus the classifier's own confidence if it gave one
    Sections {
        sections: BTreeMap<String, String>,
        confidence: Option<f32>,
    },
    /// Output that was not a JSON object; the chunk yields no sections
    Malformed(String),
}

impl Classification {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Classification::Malformed(_))
    }
}

/// Trait for LLM-based section classification
///
/// Implementations:
/// - `OllamaClassifier`: Local Ollama server with JSON output mode
#[async_trait]
pub trait SectionClassifier: Send + Sync {
    /// Classify a chunk into named sections. Transport failures are errors;
    /// unusable output is `Classification::Malformed`.
    async fn classify(&self, chunk: &str) -> Result<Classification>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Prompt asking for a JSON map of proposal sections
pub fn build_prompt(chunk: &str) -> String {
    format!(
        r#"You are analyzing a business proposal. Identify which of the following sections appear in the text below:
- title: the proposal title
- context: background and current situation
- problem: the problem or challenge being addressed
- solution: the proposed solution
- scope: project scope and deliverables
- timeline: timeline and milestones
- investment: costs and pricing
- differentials: competitive advantages

Respond with a single JSON object. Use the section names above as keys and copy the matching text verbatim as values.
Omit sections that are not present. Add a "confidence" key between 0 and 1.

TEXT:
{}

JSON:"#,
        chunk
    )
}

/// Parse classifier output into sections.
///
/// Tolerates markdown fences and surrounding prose. String values are kept
/// as-is, other values are stringified, and `confidence` is read separately.
pub fn parse_section_response(raw: &str) -> Classification {
    let candidate = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => return Classification::Malformed(raw.to_string()),
    };

    let object = match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => object,
        _ => return Classification::Malformed(raw.to_string()),
    };

    let mut sections = BTreeMap::new();
    let mut confidence = None;
    for (key, value) in object {
        if key.eq_ignore_ascii_case("confidence") {
            confidence = value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .map(|c| c.clamp(0.0, 1.0) as f32);
            continue;
        }
        let content = match value {
            Value::Null => continue,
            Value::String(text) => text,
            other => other.to_string(),
        };
        let content = content.trim();
        if !content.is_empty() {
            sections.insert(key, content.to_string());
        }
    }

    Classification::Sections {
        sections,
        confidence,
    }
}

//! Surface language pattern detection

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::LanguagePatterns;

pub(crate) static BULLET_POINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[•\-\*]\s").expect("valid regex"));
pub(crate) static NUMBERED_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d+\.\s").expect("valid regex"));
pub(crate) static TECHNICAL_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:API|SDK|cloud|infrastructure|integration|implementation|deployment)\b")
        .expect("valid regex")
});
pub(crate) static MONETARY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:R\$|\$)\s*\d+(?:\.\d{3})*(?:,\d{2})?").expect("valid regex"));
pub(crate) static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").expect("valid regex"));
pub(crate) static PERCENTAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?%").expect("valid regex"));
pub(crate) static SENTENCE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid regex"));

/// Split text into trimmed, non-empty sentences
pub fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_BREAK
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Count language features in `text`
pub fn detect_patterns(text: &str) -> LanguagePatterns {
    let sentences = sentences(text);
    let words: usize = sentences.iter().map(|s| s.split_whitespace().count()).sum();

    LanguagePatterns {
        bullet_points: BULLET_POINT.find_iter(text).count(),
        numbered_lists: NUMBERED_LIST.find_iter(text).count(),
        technical_terms: TECHNICAL_TERM.find_iter(text).count(),
        monetary_values: MONETARY_VALUE.find_iter(text).count(),
        dates: DATE.find_iter(text).count(),
        percentages: PERCENTAGE.find_iter(text).count(),
        sentence_count: sentences.len(),
        average_sentence_length: if sentences.is_empty() {
            0.0
        } else {
            words as f64 / sentences.len() as f64
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_structural_patterns() {
        let text = "Scope of work\n\
                    - Cloud deployment\n\
                    * API integration\n\
                    1. Discovery\n\
                    2. Implementation\n\
                    Total investment: R$ 150.000,00 or $ 30000 by 15/03/2025, with 20% upfront.";

        let patterns = detect_patterns(text);
        assert_eq!(patterns.bullet_points, 2);
        assert_eq!(patterns.numbered_lists, 2);
        assert_eq!(patterns.technical_terms, 5);
        assert_eq!(patterns.monetary_values, 2);
        assert_eq!(patterns.dates, 1);
        assert_eq!(patterns.percentages, 1);
    }

    #[test]
    fn test_sentence_statistics() {
        let patterns = detect_patterns("We migrate the platform. It takes six weeks! Ready?");
        assert_eq!(patterns.sentence_count, 3);
        assert!((patterns.average_sentence_length - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(detect_patterns(""), LanguagePatterns::default());
    }
}

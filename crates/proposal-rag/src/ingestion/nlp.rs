//! Rule-based NLP signals: key phrases, technical terms, entities, complexity
//!
//! These signals are cheap enough to run on every block and are used to
//! cross-check LLM section classification and to build the document-level
//! key information record.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

use super::patterns::{sentences, DATE, MONETARY_VALUE, PERCENTAGE};
use crate::types::{KeyInformation, NlpInsights, TechnicalTerm};

const TECHNICAL_VOCABULARY: &[&str] = &[
    "api",
    "sdk",
    "cloud",
    "infrastructure",
    "integration",
    "implementation",
    "deployment",
    "database",
    "server",
    "security",
    "network",
    "framework",
    "platform",
    "service",
    "architecture",
    "interface",
    "protocol",
    "algorithm",
    "authentication",
    "authorization",
    "encryption",
    "scaling",
];

/// Terms that, in a complex block, confirm a technical section
const CONFIRMING_TERMS: &[&str] = &["architecture", "implementation", "solution"];

const SUBORDINATORS: &[&str] = &[
    "although", "because", "since", "unless", "whereas", "while", "which", "that", "if", "when",
    "whether", "though", "so", "until", "after", "before",
];

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "do", "for", "from",
    "has", "have", "in", "into", "is", "it", "its", "of", "on", "or", "our", "that", "the",
    "their", "this", "to", "was", "we", "will", "with", "you", "your", "which", "these", "those",
    "all", "also", "any", "each", "more", "most", "such", "than", "then", "there", "they",
    "would", "should", "could", "may", "must", "not", "no", "per", "via", "over", "under",
];

static PHRASE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[,;:()\[\]"“”!?.\n]+"#).expect("valid regex"));
static MONTH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}\b",
    )
    .expect("valid regex")
});
static ORGANIZATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[A-Z][A-Za-z0-9&]*\s+){1,4}(?:Inc\.?|Ltd\.?|LLC|Corp\.?|S\.A\.|Ltda\.?)")
        .expect("valid regex")
});
static ACRONYM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{2,6}\b").expect("valid regex"));

/// Structural statistics of a text
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TextStructure {
    pub sentence_count: usize,
    pub avg_sentence_length: f64,
    pub avg_word_length: f64,
    pub unique_words: usize,
    /// 0..=1
    pub complexity_score: f64,
}

/// Rule-based text analyzer
#[derive(Debug, Clone)]
pub struct NlpAnalyzer {
    /// Phrases and terms kept per block
    pub insight_limit: usize,
    /// Phrases kept per document
    pub key_phrase_limit: usize,
}

impl Default for NlpAnalyzer {
    fn default() -> Self {
        Self {
            insight_limit: 5,
            key_phrase_limit: 20,
        }
    }
}

impl NlpAnalyzer {
    /// Frequency-ranked 1-3 word phrases that do not cross stopwords or punctuation
    pub fn key_phrases(&self, text: &str, limit: usize) -> Vec<String> {
        let mut scores: HashMap<String, (usize, usize, usize)> = HashMap::new();
        let mut order = 0usize;

        for segment in PHRASE_BREAK.split(text) {
            let words: Vec<String> = segment.unicode_words().map(str::to_lowercase).collect();
            for run in words.split(|w| is_stopword(w)) {
                for n in 1..=3.min(run.len()) {
                    for gram in run.windows(n) {
                        if n == 1 && (gram[0].chars().count() < 3 || is_numeric(&gram[0])) {
                            continue;
                        }
                        let phrase = gram.join(" ");
                        let entry = scores.entry(phrase).or_insert((0, n, order));
                        entry.0 += 1;
                        order += 1;
                    }
                }
            }
        }

        let mut ranked: Vec<(String, (usize, usize, usize))> = scores
            .into_iter()
            .filter(|(_, (count, n, _))| *count > 1 || *n > 1)
            .collect();
        ranked.sort_by(|a, b| {
            let score_a = a.1 .0 * a.1 .1;
            let score_b = b.1 .0 * b.1 .1;
            score_b.cmp(&score_a).then(a.1 .2.cmp(&b.1 .2))
        });

        let mut selected: Vec<String> = Vec::new();
        for (phrase, _) in ranked {
            if selected.len() >= limit {
                break;
            }
            if selected.iter().any(|kept| kept.contains(&phrase)) {
                continue;
            }
            selected.push(phrase);
        }
        selected
    }

    /// Vocabulary terms, version-like numbers and uppercase acronyms, each
    /// with five words of context on either side
    pub fn technical_terms(&self, text: &str) -> Vec<TechnicalTerm> {
        let tokens: Vec<&str> = text.unicode_words().collect();
        tokens
            .iter()
            .enumerate()
            .filter(|(_, token)| is_technical(token))
            .map(|(i, token)| {
                let start = i.saturating_sub(5);
                let end = (i + 6).min(tokens.len());
                TechnicalTerm {
                    term: token.to_string(),
                    context: tokens[start..end].join(" "),
                }
            })
            .collect()
    }

    /// Entities grouped by label, deduplicated in order of appearance
    pub fn entities(&self, text: &str) -> BTreeMap<String, Vec<String>> {
        let mut entities = BTreeMap::new();
        let mut add = |label: &str, values: Vec<&str>| {
            let mut seen = HashSet::new();
            let unique: Vec<String> = values
                .into_iter()
                .map(str::trim)
                .filter(|v| !v.is_empty() && seen.insert(v.to_string()))
                .map(str::to_string)
                .collect();
            if !unique.is_empty() {
                entities.insert(label.to_string(), unique);
            }
        };

        add("MONEY", MONETARY_VALUE.find_iter(text).map(|m| m.as_str()).collect());
        add(
            "DATE",
            DATE.find_iter(text)
                .chain(MONTH_DATE.find_iter(text))
                .map(|m| m.as_str())
                .collect(),
        );
        add("PERCENT", PERCENTAGE.find_iter(text).map(|m| m.as_str()).collect());
        add("ORG", ORGANIZATION.find_iter(text).map(|m| m.as_str()).collect());
        add("ACRONYM", ACRONYM.find_iter(text).map(|m| m.as_str()).collect());
        entities
    }

    pub fn structure(&self, text: &str) -> TextStructure {
        let sentences = sentences(text);
        let words: Vec<&str> = text.unicode_words().collect();
        if words.is_empty() {
            return TextStructure::default();
        }

        let lowered: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
        let unique_words = lowered
            .iter()
            .filter(|w| w.chars().all(char::is_alphabetic))
            .collect::<HashSet<_>>()
            .len();
        let sentence_count = sentences.len().max(1);
        let subordinators = lowered
            .iter()
            .filter(|w| SUBORDINATORS.contains(&w.as_str()))
            .count();
        let technical = words.iter().filter(|w| is_technical(w)).count();

        // Clause depth approximated by subordinators and commas per sentence
        let depth_total: usize = sentences
            .iter()
            .map(|s| {
                let clauses = s
                    .unicode_words()
                    .filter(|w| SUBORDINATORS.contains(&w.to_lowercase().as_str()))
                    .count();
                1 + clauses + s.matches(',').count()
            })
            .sum();
        let avg_depth = if sentences.is_empty() {
            1.0
        } else {
            depth_total as f64 / sentences.len() as f64
        };

        let complexity_score = 0.4 * (subordinators as f64 / sentence_count as f64).min(1.0)
            + 0.3 * (technical as f64 / words.len() as f64).min(1.0)
            + 0.3 * (avg_depth / 5.0).min(1.0);

        TextStructure {
            sentence_count: sentences.len(),
            avg_sentence_length: words.len() as f64 / sentence_count as f64,
            avg_word_length: words.iter().map(|w| w.chars().count()).sum::<usize>() as f64
                / words.len() as f64,
            unique_words,
            complexity_score: complexity_score.clamp(0.0, 1.0),
        }
    }

    /// Signals attached to a classified block
    pub fn insights(&self, text: &str) -> NlpInsights {
        let mut seen = HashSet::new();
        let technical_terms = self
            .technical_terms(text)
            .into_iter()
            .map(|t| t.term)
            .filter(|term| seen.insert(term.to_lowercase()))
            .take(self.insight_limit)
            .collect();

        NlpInsights {
            key_phrases: self.key_phrases(text, self.insight_limit),
            technical_terms,
            complexity_score: self.structure(text).complexity_score,
        }
    }

    /// Raise confidence by 0.1 (capped at 1.0) when a complex block mentions
    /// a confirming technical term
    pub fn adjust_confidence(&self, confidence: f32, insights: &NlpInsights) -> f32 {
        let confirmed = insights.complexity_score > 0.7
            && insights
                .technical_terms
                .iter()
                .any(|term| CONFIRMING_TERMS.contains(&term.to_lowercase().as_str()));
        if confirmed {
            (confidence + 0.1).min(1.0)
        } else {
            confidence
        }
    }

    /// Document-level entities, key phrases and technical terms
    pub fn extract_key_information(&self, text: &str) -> KeyInformation {
        KeyInformation {
            entities: self.entities(text),
            key_phrases: self.key_phrases(text, self.key_phrase_limit),
            technical_terms: self.technical_terms(text),
        }
    }
}

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

fn is_numeric(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
}

fn is_technical(token: &str) -> bool {
    let lower = token.to_lowercase();
    TECHNICAL_VOCABULARY.contains(&lower.as_str())
        || is_numeric(token)
        || (token.len() >= 2
            && token.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            && token.chars().any(|c| c.is_ascii_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_technical_terms_with_context() {
        let analyzer = NlpAnalyzer::default();
        let terms = analyzer.technical_terms("We will deploy the REST gateway on the cloud platform version 2.1 next quarter");

        let names: Vec<&str> = terms.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(names, vec!["REST", "cloud", "platform", "2.1"]);
        assert_eq!(terms[0].context, "We will deploy the REST gateway on the cloud platform");
    }

    #[test]
    fn test_entities_by_label() {
        let analyzer = NlpAnalyzer::default();
        let entities = analyzer.entities(
            "Acme Solutions Inc. will deliver the ERP rollout for $ 25000 by 01/06/2025, \
             a 15% saving. Delivery on March 3, 2025.",
        );

        assert_eq!(entities["MONEY"], vec!["$ 25000"]);
        assert_eq!(entities["DATE"], vec!["01/06/2025", "March 3, 2025"]);
        assert_eq!(entities["PERCENT"], vec!["15%"]);
        assert_eq!(entities["ORG"], vec!["Acme Solutions Inc."]);
        assert_eq!(entities["ACRONYM"], vec!["ERP"]);
    }

    #[test]
    fn test_key_phrases_prefer_repeated_multiword_phrases() {
        let analyzer = NlpAnalyzer::default();
        let text = "Data migration is critical. The data migration plan covers legacy systems. \
                    A phased data migration reduces risk.";
        let phrases = analyzer.key_phrases(text, 3);

        assert_eq!(phrases[0], "data migration");
        assert!(phrases.iter().all(|p| !STOPWORDS.contains(&p.as_str())));
    }

    #[test]
    fn test_complexity_is_bounded_and_ordered() {
        let analyzer = NlpAnalyzer::default();
        let simple = analyzer.structure("We paint walls. We clean floors.");
        let complex = analyzer.structure(
            "Because the architecture depends on the API, which integrates the cloud platform \
             while the database server, although secured, handles authentication, we scale when needed.",
        );

        assert!(simple.complexity_score >= 0.0 && simple.complexity_score <= 1.0);
        assert!(complex.complexity_score <= 1.0);
        assert!(complex.complexity_score > simple.complexity_score);
        assert_eq!(simple.sentence_count, 2);
    }

    #[test]
    fn test_confidence_adjustment() {
        let analyzer = NlpAnalyzer::default();
        let insights = NlpInsights {
            key_phrases: vec![],
            technical_terms: vec!["Architecture".to_string()],
            complexity_score: 0.8,
        };
        assert!((analyzer.adjust_confidence(0.8, &insights) - 0.9).abs() < 1e-6);
        assert_eq!(analyzer.adjust_confidence(0.95, &insights), 1.0);

        let plain = NlpInsights {
            complexity_score: 0.5,
            ..insights
        };
        assert_eq!(analyzer.adjust_confidence(0.8, &plain), 0.8);
    }
}

//! Deterministic contradiction detection across facts.
//!
//! Used when the model cannot produce a contradiction list. Finds conflicting
//! claims from different sources using keyword overlap, negation and numeric
//! disagreement.

use crate::types::{Contradiction, ContradictionNature, Fact};
use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "shall", "should", "may", "might", "must", "can",
    "could", "of", "in", "to", "for", "with", "on", "at", "from", "by", "about", "as", "into",
    "through", "during", "before", "after", "above", "below", "between", "this", "that",
    "these", "those", "it", "its", "and", "but", "or", "what", "how", "why", "which", "who",
];

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "neither", "without", "lack", "doesn't", "don't", "isn't", "aren't",
    "wasn't", "weren't", "won't", "cannot", "can't",
];

/// Detects contradictions between facts.
pub struct ContradictionDetector {
    /// Minimum keyword overlap to consider facts as being about the same thing.
    min_overlap: f64,
}

impl ContradictionDetector {
    pub fn new() -> Self {
        Self { min_overlap: 0.3 }
    }

    /// Detect contradictions across all fact pairs.
    pub fn detect(&self, facts: &[Fact]) -> Vec<Contradiction> {
        let mut contradictions = Vec::new();
        for i in 0..facts.len() {
            for j in (i + 1)..facts.len() {
                // Skip facts from the same source
                if facts[i].source_url == facts[j].source_url {
                    continue;
                }
                if let Some(c) = self.check_pair(&facts[i], &facts[j]) {
                    contradictions.push(c);
                }
            }
        }
        contradictions
    }

    fn check_pair(&self, a: &Fact, b: &Fact) -> Option<Contradiction> {
        let overlap = keyword_overlap(&keywords(&a.content), &keywords(&b.content));
        if overlap < self.min_overlap {
            return None;
        }

        if has_negation(&a.content) != has_negation(&b.content) && overlap > 0.4 {
            return Some(contradiction(
                a,
                b,
                ContradictionNature::Direct,
                "one claim negates the other",
            ));
        }

        let nums_a = extract_numbers(&a.content);
        let nums_b = extract_numbers(&b.content);
        if !nums_a.is_empty() && !nums_b.is_empty() {
            let mismatch = nums_a.iter().all(|na| {
                nums_b
                    .iter()
                    .all(|nb| (na - nb).abs() / na.abs().max(1.0) > 0.1)
            });
            if mismatch {
                return Some(contradiction(
                    a,
                    b,
                    ContradictionNature::Nuanced,
                    "the claims report different figures",
                ));
            }
        }
        None
    }
}

impl Default for ContradictionDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn contradiction(a: &Fact, b: &Fact, nature: ContradictionNature, why: &str) -> Contradiction {
    Contradiction {
        claim_a: a.content.clone(),
        source_a: a.source_url.clone(),
        claim_b: b.content.clone(),
        source_b: b.source_url.clone(),
        nature,
        description: why.to_string(),
    }
}

/// Lowercased content words of `text`, stop words removed.
pub(crate) fn keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(String::from)
        .collect()
}

/// Jaccard similarity of two keyword sets.
pub(crate) fn keyword_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

fn has_negation(text: &str) -> bool {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .any(|w| NEGATION_WORDS.contains(&w))
}

fn extract_numbers(text: &str) -> Vec<f64> {
    text.split(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|s| s.trim_matches('.'))
        .filter_map(|s| s.parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(source: &str, content: &str) -> Fact {
        Fact {
            content: content.to_string(),
            source_url: source.to_string(),
            confidence: 0.8,
            perspective: "Tester".to_string(),
        }
    }

    #[test]
    fn test_detect_negation() {
        let facts = vec![
            fact(
                "https://a.com",
                "Prompt caching significantly reduces latency in LLM applications",
            ),
            fact(
                "https://b.com",
                "Prompt caching does not significantly reduce latency in LLM applications",
            ),
        ];
        let found = ContradictionDetector::new().detect(&facts);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nature, ContradictionNature::Direct);
        assert_eq!(found[0].source_b, "https://b.com");
    }

    #[test]
    fn test_detect_numeric_disagreement() {
        let facts = vec![
            fact("https://a.com", "The Rust compiler release cycle is 6 weeks long"),
            fact("https://b.com", "The Rust compiler release cycle is 12 weeks long"),
        ];
        let found = ContradictionDetector::new().detect(&facts);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nature, ContradictionNature::Nuanced);
    }

    #[test]
    fn test_no_contradiction_same_source() {
        let facts = vec![
            fact("https://a.com", "Tokio runtime is multi threaded"),
            fact("https://a.com", "Tokio runtime is not multi threaded"),
        ];
        assert!(ContradictionDetector::new().detect(&facts).is_empty());
    }

    #[test]
    fn test_unrelated_claims() {
        let facts = vec![
            fact("https://a.com", "The sky is blue"),
            fact("https://b.com", "Python is a programming language"),
        ];
        assert!(ContradictionDetector::new().detect(&facts).is_empty());
    }

    #[test]
    fn test_negation_is_word_based() {
        assert!(!has_negation("I know the answer"));
        assert!(has_negation("It doesn't scale."));
    }
}

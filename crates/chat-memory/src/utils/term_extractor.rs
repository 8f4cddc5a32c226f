//! Frequency-ranked key term extraction

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref TOKEN_SPLIT: Regex = Regex::new(r"[^\p{L}\p{N}]+").unwrap();
    static ref STOP_WORDS: HashSet<&'static str> = [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "is", "am", "are", "was", "were", "be", "been",
        "being", "have", "has", "had", "do", "does", "did", "will", "would",
        "shall", "should", "may", "might", "must", "can", "could", "i", "you",
        "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
        "my", "your", "his", "its", "our", "their", "mine", "yours", "hers",
        "ours", "theirs", "this", "that", "these", "those", "not", "from",
        "as", "if", "then", "than", "so", "what", "which", "who", "whom",
        "when", "where", "why", "how", "all", "any", "some", "just", "also",
        "into", "about", "there", "here", "out", "up", "very", "too",
        "get", "got", "let", "like", "one", "yes", "no",
    ]
    .into_iter()
    .collect();
}

pub const DEFAULT_MIN_TERM_LENGTH: usize = 3;

/// Extracts the most frequent significant tokens from free text.
///
/// Output is deterministic: frequency descending, ties in order of first
/// occurrence. The extractor holds no state between calls.
#[derive(Debug, Clone, Copy)]
pub struct TermExtractor {
    min_term_length: usize,
}

impl Default for TermExtractor {
    fn default() -> Self {
        Self {
            min_term_length: DEFAULT_MIN_TERM_LENGTH,
        }
    }
}

impl TermExtractor {
    pub fn new(min_term_length: usize) -> Self {
        Self { min_term_length }
    }

    pub fn extract(&self, text: &str, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }

        let lowered = text.to_lowercase();
        let mut ranked: Vec<(String, usize)> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();

        for token in TOKEN_SPLIT.split(&lowered) {
            if !self.is_significant(token) {
                continue;
            }
            match positions.get(token) {
                Some(&idx) => ranked[idx].1 += 1,
                None => {
                    positions.insert(token, ranked.len());
                    ranked.push((token.to_string(), 1));
                }
            }
        }

        // Stable sort keeps first-occurrence order within equal counts.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(limit);
        ranked.into_iter().map(|(term, _)| term).collect()
    }

    fn is_significant(&self, token: &str) -> bool {
        token.chars().count() >= self.min_term_length && !STOP_WORDS.contains(token)
    }
}

/// Top `limit` key terms of `text` with the default extractor.
pub fn extract_key_terms(text: &str, limit: usize) -> Vec<String> {
    TermExtractor::default().extract(text, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frequency_then_first_occurrence() {
        let terms = extract_key_terms("the cat sat on the mat and the cat ran", 2);
        assert_eq!(terms, vec!["cat", "sat"]);

        let terms = extract_key_terms("the cat sat on the mat and the cat ran", 10);
        assert_eq!(terms, vec!["cat", "sat", "mat", "ran"]);
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(extract_key_terms("", 5).is_empty());
        assert!(extract_key_terms("   \n\t  ", 5).is_empty());
    }

    #[test]
    fn test_short_tokens_and_stop_words_dropped() {
        let terms = extract_key_terms("Is it ok to go? The DB is up.", 10);
        assert!(terms.is_empty());
    }

    #[test]
    fn test_tokenizes_on_punctuation_and_lowercases() {
        let terms = extract_key_terms("Rust-lang: Tokio/tokio, SQLITE.sqlite!", 10);
        assert_eq!(terms, vec!["tokio", "sqlite", "rust", "lang"]);
    }

    #[test]
    fn test_numbers_are_terms() {
        let terms = extract_key_terms("release 2024 and release 2025", 3);
        assert_eq!(terms, vec!["release", "2024", "2025"]);
    }

    #[test]
    fn test_zero_limit() {
        assert!(extract_key_terms("database migration", 0).is_empty());
    }

    #[test]
    fn test_custom_min_length() {
        let extractor = TermExtractor::new(5);
        assert_eq!(extractor.extract("short longer words", 5), vec!["short", "longer", "words"]);
        assert_eq!(extractor.extract("cat dog bird", 5), Vec::<String>::new());
    }

    #[test]
    fn test_stop_words_ignore_case() {
        assert_eq!(extract_key_terms("The THE Which database", 5), vec!["database"]);
    }

    proptest! {
        #[test]
        fn prop_bounded_and_deterministic(text in "[a-zA-Z ,.!?]{0,200}", limit in 0usize..20) {
            let first = extract_key_terms(&text, limit);
            let second = extract_key_terms(&text, limit);
            prop_assert!(first.len() <= limit);
            prop_assert_eq!(&first, &second);
            let unique: HashSet<&String> = first.iter().collect();
            prop_assert_eq!(unique.len(), first.len());
        }
    }
}

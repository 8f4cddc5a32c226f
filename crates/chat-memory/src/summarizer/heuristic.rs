//! Model-free summarizer used when no local LLM backend is configured

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::memory_db::{concatenate_messages, Message, MessageRole};
use crate::summarizer::{Summarizer, MAX_TAG_CHARS};
use crate::utils::{extract_key_terms, TextUtils};

const TITLE_WORDS: usize = 6;
const SUMMARY_CHARS: usize = 400;
const DEFAULT_TITLE: &str = "New Chat";

pub struct HeuristicSummarizer {
    max_tags: usize,
}

impl Default for HeuristicSummarizer {
    fn default() -> Self {
        Self { max_tags: 5 }
    }
}

impl HeuristicSummarizer {
    pub fn new(max_tags: usize) -> Self {
        Self { max_tags: max_tags.max(1) }
    }

    /// First words of `text`, or a placeholder for blank input
    pub fn title_from_text(text: &str) -> String {
        let normalized = TextUtils::normalize_whitespace(text);
        let title = TextUtils::first_words(&normalized, TITLE_WORDS);
        let title = title.trim_end_matches(|c: char| c.is_ascii_punctuation());
        if title.is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            title.to_string()
        }
    }
}

#[async_trait]
impl Summarizer for HeuristicSummarizer {
    async fn generate_title(&self, text: &str) -> anyhow::Result<String> {
        Ok(Self::title_from_text(text))
    }

    async fn generate_summary(&self, messages: &[Message]) -> anyhow::Result<String> {
        let opening = messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .or_else(|| messages.first());
        let latest = messages.last();

        let mut parts = Vec::new();
        if let Some(first) = opening {
            parts.push(TextUtils::normalize_whitespace(&first.text()).into_owned());
        }
        if let Some(last) = latest {
            if opening.map(|m| m.id != last.id).unwrap_or(true) {
                parts.push(TextUtils::normalize_whitespace(&last.text()).into_owned());
            }
        }
        parts.retain(|p| !p.is_empty());

        let joined = parts.join(" … ");
        Ok(TextUtils::truncate_with_ellipsis(&joined, SUMMARY_CHARS).into_owned())
    }

    async fn generate_tags(&self, messages: &[Message]) -> anyhow::Result<BTreeSet<String>> {
        let text = concatenate_messages(messages);
        Ok(extract_key_terms(&text, usize::MAX)
            .into_iter()
            .filter(|term| term.chars().count() <= MAX_TAG_CHARS)
            .take(self.max_tags)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_title_uses_first_words() {
        let summarizer = HeuristicSummarizer::default();
        let title = summarizer
            .generate_title("How do I plan a zero-downtime   database migration for Postgres?")
            .await
            .unwrap();
        assert_eq!(title, "How do I plan a zero-downtime");
        assert_eq!(summarizer.generate_title("   ").await.unwrap(), "New Chat");
    }

    #[tokio::test]
    async fn test_summary_joins_opening_and_latest() {
        let summarizer = HeuristicSummarizer::default();
        let messages = vec![
            Message::user("Need help with sqlite locking"),
            Message::assistant("Use WAL mode"),
            Message::assistant("And set a busy timeout"),
        ];
        let summary = summarizer.generate_summary(&messages).await.unwrap();
        assert_eq!(summary, "Need help with sqlite locking … And set a busy timeout");

        assert_eq!(summarizer.generate_summary(&[]).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_tags_are_top_terms() {
        let summarizer = HeuristicSummarizer::new(2);
        let messages = vec![
            Message::user("sqlite sqlite locking"),
            Message::assistant("locking sqlite wal"),
        ];
        let tags = summarizer.generate_tags(&messages).await.unwrap();
        let expected: BTreeSet<String> = ["locking", "sqlite"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tags, expected);
    }

    #[tokio::test]
    async fn test_long_tokens_are_not_tags() {
        let summarizer = HeuristicSummarizer::new(2);
        let blob = "q".repeat(5000);
        let messages = vec![Message::user(format!("{} {} deploy rollback", blob, blob))];
        let tags = summarizer.generate_tags(&messages).await.unwrap();
        let expected: BTreeSet<String> = ["deploy", "rollback"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tags, expected);
    }
}

//! Summarizer capability - the narrow interface to whatever produces titles,
//! summaries and tags from raw conversation text.

pub mod heuristic;
pub mod llama_server;
#[cfg(test)]
pub mod testing;

pub use heuristic::HeuristicSummarizer;
pub use llama_server::LlamaServerSummarizer;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{MemoryConfig, SummarizerKind};
use crate::memory_db::Message;

/// Failures are expected to be transient (network, quota, model load) and
/// callers degrade rather than propagate them.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn generate_title(&self, text: &str) -> anyhow::Result<String>;

    async fn generate_summary(&self, messages: &[Message]) -> anyhow::Result<String>;

    async fn generate_tags(&self, messages: &[Message]) -> anyhow::Result<BTreeSet<String>>;
}

/// Build the summarizer selected by `config.summarizer`
pub fn from_config(config: &MemoryConfig) -> anyhow::Result<Arc<dyn Summarizer>> {
    Ok(match config.summarizer {
        SummarizerKind::Heuristic => Arc::new(HeuristicSummarizer::new(config.context_max_tags)),
        SummarizerKind::Llama => Arc::new(LlamaServerSummarizer::new(
            config.backend_url.clone(),
            config.summarizer_timeout(),
        )?),
    })
}

/// Longest tag kept by `normalize_tags`
pub const MAX_TAG_CHARS: usize = 40;

/// Trim, lowercase and drop empty or oversized tags
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| {
            tag.as_ref()
                .trim()
                .trim_matches(|c: char| c == '#' || c == '"' || c == '\'')
                .trim()
                .to_lowercase()
        })
        .filter(|tag| !tag.is_empty() && tag.chars().count() <= MAX_TAG_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(["  Rust ", "#async", "rust", "", "\"SQL\""]);
        let expected: BTreeSet<String> = ["async", "rust", "sql"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tags, expected);
    }

    #[test]
    fn test_normalize_tags_drops_oversized() {
        let blob = "Q".repeat(MAX_TAG_CHARS + 1);
        let edge = "e".repeat(MAX_TAG_CHARS);
        let tags = normalize_tags([blob.as_str(), edge.as_str(), "deploy"]);
        assert_eq!(tags.len(), 2);
        assert!(tags.contains(&edge));
        assert!(tags.contains("deploy"));
    }

    #[test]
    fn test_from_config_builds_selected_kind() {
        let config = MemoryConfig::default();
        assert!(from_config(&config).is_ok());

        let config = MemoryConfig {
            summarizer: SummarizerKind::Llama,
            ..MemoryConfig::default()
        };
        assert!(from_config(&config).is_ok());
    }
}

//! Cross-conversation context retrieval by lexical term and tag overlap

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::memory_db::conversation_store::by_recency;
use crate::memory_db::{ChatMemory, MemoryDatabase};
use crate::summarizer::MAX_TAG_CHARS;
use crate::utils::{TermExtractor, TextUtils};

/// A candidate chat with its overlap score against the seed terms
#[derive(Debug, Clone)]
pub struct ScoredChat {
    pub chat: ChatMemory,
    pub overlap: usize,
}

pub struct ContextRetriever {
    db: Arc<MemoryDatabase>,
    extractor: TermExtractor,
    query_term_limit: usize,
    top_k: usize,
    tag_weight: usize,
    snippet_chars: usize,
    max_tags: usize,
    title_max_chars: usize,
}

impl ContextRetriever {
    pub fn new(db: Arc<MemoryDatabase>, config: &MemoryConfig) -> Self {
        Self {
            db,
            extractor: TermExtractor::default(),
            query_term_limit: config.query_term_limit,
            top_k: config.context_top_k,
            tag_weight: config.context_tag_weight,
            snippet_chars: config.context_snippet_chars,
            max_tags: config.context_max_tags,
            title_max_chars: config.title_max_chars,
        }
    }

    pub fn seed_terms(&self, text: &str) -> BTreeSet<String> {
        self.extractor.extract(text, self.query_term_limit).into_iter().collect()
    }

    /// Candidates other than `active_chat_id` with a positive overlap, best
    /// first, at most `top_k`.
    pub fn rank(&self, active_chat_id: Option<&str>, current_text: &str) -> Result<Vec<ScoredChat>> {
        let seed = self.seed_terms(current_text);
        if seed.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredChat> = self
            .db
            .conversations
            .get_all_metadata()?
            .into_iter()
            .filter(|chat| Some(chat.id.as_str()) != active_chat_id)
            .filter_map(|chat| {
                let overlap = self.overlap(&chat, &seed);
                (overlap > 0).then_some(ScoredChat { chat, overlap })
            })
            .collect();

        scored.sort_by(|a, b| b.overlap.cmp(&a.overlap).then_with(|| by_recency(&a.chat, &b.chat)));
        scored.truncate(self.top_k);

        debug!("Context retrieval for {} seed terms kept {} chats", seed.len(), scored.len());
        Ok(scored)
    }

    /// Snippets from the most relevant other chats. Empty history gives an
    /// empty result.
    pub fn find_relevant_context(&self, active_chat_id: Option<&str>, current_text: &str) -> Result<Vec<String>> {
        Ok(self
            .rank(active_chat_id, current_text)?
            .iter()
            .map(|scored| self.format_snippet(&scored.chat))
            .collect())
    }

    /// `|seed ∩ key_terms| + tag_weight * |seed ∩ tags|`
    fn overlap(&self, chat: &ChatMemory, seed: &BTreeSet<String>) -> usize {
        let key_terms: HashSet<&String> = chat.key_terms.iter().collect();
        let term_hits = seed.iter().filter(|t| key_terms.contains(t)).count();
        let tag_hits = seed.iter().filter(|t| chat.tags.contains(*t)).count();
        term_hits + self.tag_weight * tag_hits
    }

    pub fn format_snippet(&self, chat: &ChatMemory) -> String {
        let title = TextUtils::truncate_with_ellipsis(chat.title.trim(), self.title_max_chars);
        let mut snippet = format!("[Related conversation: {}]", title);

        let summary = TextUtils::normalize_whitespace(&chat.summary);
        if !summary.is_empty() {
            snippet.push_str("\nSummary: ");
            snippet.push_str(&TextUtils::truncate_with_ellipsis(&summary, self.snippet_chars));
        }

        if !chat.tags.is_empty() {
            let tags: Vec<_> = chat
                .tags
                .iter()
                .take(self.max_tags)
                .map(|tag| TextUtils::truncate_with_ellipsis(tag, MAX_TAG_CHARS))
                .collect();
            snippet.push_str("\nTags: ");
            snippet.push_str(&tags.join(", "));
        }
        snippet
    }
}

//! Inverted term index over chat tags and key terms.
//!
//! This is a cache: it can be rebuilt at any time from the chats table and
//! callers re-check every hit against the loaded record.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::memory_db::schema::ChatMemory;

#[derive(Default)]
pub struct TermIndex {
    postings: DashMap<String, HashSet<String>>,
    built: AtomicBool,
}

impl TermIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_built(&self) -> bool {
        self.built.load(Ordering::Acquire)
    }

    /// Replace the whole index with postings derived from `chats`
    pub fn rebuild(&self, chats: &[ChatMemory]) {
        self.postings.clear();
        for chat in chats {
            self.insert_terms(&chat.id, chat_terms(chat));
        }
        self.built.store(true, Ordering::Release);
        debug!("Rebuilt term index: {} terms over {} chats", self.postings.len(), chats.len());
    }

    /// Re-index one chat after its tags or key terms changed
    pub fn upsert(&self, chat: &ChatMemory) {
        self.remove(&chat.id);
        self.insert_terms(&chat.id, chat_terms(chat));
    }

    pub fn remove(&self, chat_id: &str) {
        self.postings.retain(|_, ids| {
            ids.remove(chat_id);
            !ids.is_empty()
        });
    }

    /// Ids of chats that carry at least one of `terms`
    pub fn candidates<'a, I>(&self, terms: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut ids = HashSet::new();
        for term in terms {
            if let Some(posting) = self.postings.get(term.as_str()) {
                ids.extend(posting.iter().cloned());
            }
        }
        ids
    }

    fn insert_terms<'a>(&self, chat_id: &str, terms: impl Iterator<Item = &'a String>) {
        for term in terms {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(chat_id.to_string());
        }
    }
}

fn chat_terms(chat: &ChatMemory) -> impl Iterator<Item = &String> {
    chat.tags.iter().chain(chat.key_terms.iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(tags: &[&str], key_terms: &[&str]) -> ChatMemory {
        let mut chat = ChatMemory::new("test");
        chat.tags = tags.iter().map(|t| t.to_string()).collect();
        chat.key_terms = key_terms.iter().map(|t| t.to_string()).collect();
        chat
    }

    fn terms(values: &[&str]) -> Vec<String> {
        values.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_candidates_from_tags_and_key_terms() {
        let db_chat = chat(&["database", "sql"], &["migration"]);
        let food_chat = chat(&["cooking"], &["pasta"]);
        let index = TermIndex::new();
        index.rebuild(&[db_chat.clone(), food_chat.clone()]);

        let hits = index.candidates(&terms(&["migration", "database"]));
        assert_eq!(hits.len(), 1);
        assert!(hits.contains(&db_chat.id));

        let hits = index.candidates(&terms(&["pasta"]));
        assert!(hits.contains(&food_chat.id));
        assert!(index.is_built());
    }

    #[test]
    fn test_upsert_replaces_old_terms() {
        let mut chat = chat(&["rust"], &[]);
        let index = TermIndex::new();
        index.rebuild(std::slice::from_ref(&chat));

        chat.tags = ["python".to_string()].into_iter().collect();
        index.upsert(&chat);

        assert!(index.candidates(&terms(&["rust"])).is_empty());
        assert!(index.candidates(&terms(&["python"])).contains(&chat.id));
    }

    #[test]
    fn test_remove_drops_empty_postings() {
        let chat = chat(&["solo"], &["term"]);
        let index = TermIndex::new();
        index.rebuild(std::slice::from_ref(&chat));
        assert_eq!(index.postings.len(), 2);

        index.remove(&chat.id);
        assert!(index.postings.is_empty());
    }

    #[test]
    fn test_incremental_matches_rebuild() {
        let chats = vec![chat(&["a1x"], &["shared"]), chat(&["b2y"], &["shared", "other"])];

        let incremental = TermIndex::new();
        for c in &chats {
            incremental.upsert(c);
        }
        let rebuilt = TermIndex::new();
        rebuilt.rebuild(&chats);

        for term in ["a1x", "b2y", "shared", "other"] {
            let term = vec![term.to_string()];
            assert_eq!(incremental.candidates(&term), rebuilt.candidates(&term));
        }
    }
}

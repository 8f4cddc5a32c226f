//! Analysis scheduler - decides when a chat's metadata is recomputed and
//! merges the Summarizer output back into the store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::context_engine::chat_locks::ChatLocks;
use crate::error::{MemoryError, Result};
use crate::memory_db::{concatenate_messages, AnalysisUpdate, MemoryDatabase, MessageRole};
use crate::summarizer::{normalize_tags, Summarizer};
use crate::utils::TermExtractor;

/// Decides, after each append, whether the chat gets a fresh analysis pass
pub trait AnalysisPolicy: Send + Sync {
    fn should_analyze(&self, message_count: usize, appended_role: MessageRole) -> bool;
}

/// Analyse every message during warm-up, then every `refresh_interval`
/// messages, and always after a user turn when `refresh_on_user` is set.
#[derive(Debug, Clone)]
pub struct DefaultAnalysisPolicy {
    pub warmup_messages: usize,
    pub refresh_interval: usize,
    pub refresh_on_user: bool,
}

impl Default for DefaultAnalysisPolicy {
    fn default() -> Self {
        Self {
            warmup_messages: 5,
            refresh_interval: 3,
            refresh_on_user: true,
        }
    }
}

impl DefaultAnalysisPolicy {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            warmup_messages: config.analysis_warmup_messages,
            refresh_interval: config.analysis_refresh_interval,
            refresh_on_user: true,
        }
    }
}

impl AnalysisPolicy for DefaultAnalysisPolicy {
    fn should_analyze(&self, message_count: usize, appended_role: MessageRole) -> bool {
        if message_count == 0 {
            return false;
        }
        message_count <= self.warmup_messages
            || (self.refresh_interval > 0 && message_count % self.refresh_interval == 0)
            || (self.refresh_on_user && appended_role == MessageRole::User)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Applied,
    /// The chat was deleted while the pass was in flight; nothing written
    Discarded,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub chat_id: String,
    pub message_count: usize,
    pub summary_updated: bool,
    pub tags_updated: bool,
    pub key_terms: Vec<String>,
    pub outcome: AnalysisOutcome,
}

impl AnalysisReport {
    fn discarded(chat_id: &str, message_count: usize) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            message_count,
            summary_updated: false,
            tags_updated: false,
            key_terms: Vec::new(),
            outcome: AnalysisOutcome::Discarded,
        }
    }
}

pub struct AnalysisScheduler {
    db: Arc<MemoryDatabase>,
    summarizer: Arc<dyn Summarizer>,
    policy: Arc<dyn AnalysisPolicy>,
    locks: Arc<ChatLocks>,
    extractor: TermExtractor,
    key_term_limit: usize,
    call_timeout: Duration,
}

impl AnalysisScheduler {
    pub fn new(
        db: Arc<MemoryDatabase>,
        summarizer: Arc<dyn Summarizer>,
        locks: Arc<ChatLocks>,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            db,
            summarizer,
            policy: Arc::new(DefaultAnalysisPolicy::from_config(config)),
            locks,
            extractor: TermExtractor::default(),
            key_term_limit: config.key_term_limit,
            call_timeout: config.summarizer_timeout(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AnalysisPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn should_analyze(&self, message_count: usize, appended_role: MessageRole) -> bool {
        self.policy.should_analyze(message_count, appended_role)
    }

    /// Recompute summary, tags and key terms from the chat's current messages.
    ///
    /// Summarizer failures keep the previous values; only storage errors are
    /// returned.
    pub async fn run_pass(&self, chat_id: &str) -> Result<AnalysisReport> {
        let _pass = self.locks.lock_analysis(chat_id).await;

        let messages = self.db.conversations.get_messages(chat_id)?;
        if messages.is_empty() && self.db.conversations.get_metadata(chat_id)?.is_none() {
            debug!("Chat {} is gone; skipping analysis", chat_id);
            return Ok(AnalysisReport::discarded(chat_id, 0));
        }
        let message_count = messages.len();
        debug!("Analysing chat {} over {} messages", chat_id, message_count);

        let text = concatenate_messages(&messages);
        let key_terms = self.extractor.extract(&text, self.key_term_limit);

        let (summary, tags) = tokio::join!(
            self.bounded("summary", chat_id, self.summarizer.generate_summary(&messages)),
            self.bounded("tags", chat_id, self.summarizer.generate_tags(&messages)),
        );

        let summary = summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let tags = tags.map(|t| normalize_tags(t)).filter(|t| !t.is_empty());

        let update = AnalysisUpdate {
            summary,
            tags,
            key_terms: key_terms.clone(),
        };
        let stored = self.db.conversations.apply_analysis(chat_id, &update)?;

        if stored.is_none() {
            info!("Chat {} deleted during analysis; discarded result", chat_id);
            return Ok(AnalysisReport::discarded(chat_id, message_count));
        }

        debug!(
            "Analysis applied to chat {} (summary: {}, tags: {}, {} key terms)",
            chat_id,
            update.summary.is_some(),
            update.tags.is_some(),
            key_terms.len()
        );
        Ok(AnalysisReport {
            chat_id: chat_id.to_string(),
            message_count,
            summary_updated: update.summary.is_some(),
            tags_updated: update.tags.is_some(),
            key_terms,
            outcome: AnalysisOutcome::Applied,
        })
    }

    /// Await one Summarizer call under the configured timeout. Failures are
    /// logged and become `None`.
    async fn bounded<T, F>(&self, what: &str, chat_id: &str, call: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let error = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => MemoryError::Analysis(format!("{} for chat {} failed: {}", what, chat_id, e)),
            Err(_) => MemoryError::Analysis(format!(
                "{} for chat {} timed out after {:?}",
                what, chat_id, self.call_timeout
            )),
        };
        warn!("{}; keeping previous value", error);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::{ChatMemory, Message};
    use crate::summarizer::testing::{tag_set, Reply, ScriptedSummarizer};

    struct Fixture {
        db: Arc<MemoryDatabase>,
        summarizer: Arc<ScriptedSummarizer>,
        scheduler: Arc<AnalysisScheduler>,
    }

    fn fixture(summarizer: ScriptedSummarizer) -> Fixture {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let summarizer = Arc::new(summarizer);
        let config = MemoryConfig {
            summarizer_timeout_seconds: 1,
            ..MemoryConfig::default()
        };
        let scheduler = Arc::new(AnalysisScheduler::new(
            Arc::clone(&db),
            summarizer.clone(),
            Arc::new(ChatLocks::new()),
            &config,
        ));
        Fixture { db, summarizer, scheduler }
    }

    fn chat_with(db: &MemoryDatabase, texts: &[&str]) -> String {
        let chat = ChatMemory::new("Fixture");
        db.conversations.create(&chat).unwrap();
        for text in texts {
            db.conversations.append_message(&chat.id, &Message::user(*text)).unwrap();
        }
        chat.id
    }

    #[test]
    fn test_assistant_stream_trigger_points() {
        let policy = DefaultAnalysisPolicy::default();
        let triggered: Vec<usize> = (1..=20)
            .filter(|n| policy.should_analyze(*n, MessageRole::Assistant))
            .collect();
        assert_eq!(triggered, vec![1, 2, 3, 4, 5, 6, 9, 12, 15, 18]);
    }

    #[test]
    fn test_user_messages_always_trigger() {
        let policy = DefaultAnalysisPolicy::default();
        assert!((1..=50).all(|n| policy.should_analyze(n, MessageRole::User)));
        assert!(!policy.should_analyze(7, MessageRole::Tool));
    }

    #[tokio::test]
    async fn test_pass_merges_all_metadata() {
        let f = fixture(ScriptedSummarizer::new());
        f.summarizer.set_tags(Reply::Value(tag_set(&[" Database ", "SQL"])));
        let chat_id = chat_with(&f.db, &["database migration plan", "migration rollback for the database"]);

        let report = f.scheduler.run_pass(&chat_id).await.unwrap();
        assert_eq!(report.outcome, AnalysisOutcome::Applied);
        assert_eq!(report.message_count, 2);
        assert!(report.summary_updated && report.tags_updated);
        assert_eq!(&report.key_terms[..2], &["database".to_string(), "migration".to_string()]);

        let chat = f.db.conversations.get(&chat_id).unwrap().unwrap();
        assert_eq!(chat.summary, "summary of 2 messages");
        assert_eq!(chat.tags, tag_set(&["database", "sql"]));
        assert_eq!(chat.key_terms, report.key_terms);
        assert_eq!(chat.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_metadata() {
        let f = fixture(ScriptedSummarizer::new());
        let chat_id = chat_with(&f.db, &["kubernetes ingress routing"]);
        f.scheduler.run_pass(&chat_id).await.unwrap();

        f.summarizer.set_summary(Reply::Fail);
        f.summarizer.set_tags(Reply::Fail);
        f.db.conversations
            .append_message(&chat_id, &Message::assistant("terraform modules"))
            .unwrap();
        let report = f.scheduler.run_pass(&chat_id).await.unwrap();

        assert_eq!(report.outcome, AnalysisOutcome::Applied);
        assert!(!report.summary_updated && !report.tags_updated);
        let chat = f.db.conversations.get_metadata(&chat_id).unwrap().unwrap();
        assert_eq!(chat.summary, "summary of 1 messages");
        assert_eq!(chat.tags, tag_set(&["scripted"]));
        assert!(chat.key_terms.contains(&"terraform".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_keeps_last_good_summary() {
        let f = fixture(ScriptedSummarizer::new());
        let chat_id = chat_with(&f.db, &["first topic"]);
        f.scheduler.run_pass(&chat_id).await.unwrap();

        f.summarizer.set_summary(Reply::Hang);
        let report = f.scheduler.run_pass(&chat_id).await.unwrap();
        assert!(!report.summary_updated);
        assert!(report.tags_updated);

        let chat = f.db.conversations.get_metadata(&chat_id).unwrap().unwrap();
        assert_eq!(chat.summary, "summary of 1 messages");
    }

    #[tokio::test]
    async fn test_empty_results_do_not_overwrite() {
        let f = fixture(ScriptedSummarizer::new());
        let chat_id = chat_with(&f.db, &["gardening tomatoes"]);
        f.scheduler.run_pass(&chat_id).await.unwrap();

        f.summarizer.set_summary(Reply::Value("   ".to_string()));
        f.summarizer.set_tags(Reply::Value(tag_set(&["", " "])));
        let report = f.scheduler.run_pass(&chat_id).await.unwrap();
        assert!(!report.summary_updated && !report.tags_updated);

        let chat = f.db.conversations.get_metadata(&chat_id).unwrap().unwrap();
        assert_eq!(chat.summary, "summary of 1 messages");
        assert_eq!(chat.tags, tag_set(&["scripted"]));
    }

    #[tokio::test]
    async fn test_deleted_mid_flight_is_discarded() {
        let f = fixture(ScriptedSummarizer::new());
        let chat_id = chat_with(&f.db, &["short lived chat"]);

        let gate = f.summarizer.hold().await;
        let scheduler = Arc::clone(&f.scheduler);
        let id = chat_id.clone();
        let pass = tokio::spawn(async move { scheduler.run_pass(&id).await });

        f.summarizer.wait_entered().await;
        assert!(f.db.conversations.delete(&chat_id).unwrap());
        drop(gate);

        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.outcome, AnalysisOutcome::Discarded);
        assert!(f.db.conversations.get(&chat_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_chat_is_discarded() {
        let f = fixture(ScriptedSummarizer::new());
        let report = f.scheduler.run_pass("missing").await.unwrap();
        assert_eq!(report.outcome, AnalysisOutcome::Discarded);
        assert_eq!(f.summarizer.analysis_calls(), 0);
    }
}

//! Memory service - the orchestrator applications talk to.
//!
//! Owns the current-chat pointer, appends messages durably, hands analysis
//! to the scheduler on a background task and answers context, search,
//! export/import and stats queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::context_engine::analysis_scheduler::{AnalysisPolicy, AnalysisReport, AnalysisScheduler};
use crate::context_engine::chat_locks::ChatLocks;
use crate::context_engine::context_retriever::ContextRetriever;
use crate::error::{MemoryError, Result};
use crate::memory_db::{
    ChatBio, ChatMemory, ChatStats, ContentSegment, MemoryDatabase, Message, MessageContent,
};
use crate::summarizer::{normalize_tags, HeuristicSummarizer, Summarizer};
use crate::utils::{extract_key_terms, TextUtils};

pub const EXPORT_FORMAT: &str = "chat-memory/v1";
const MOST_USED_TAGS: usize = 10;

/// Background analysis pass started by an append
pub struct AnalysisHandle {
    chat_id: String,
    task: JoinHandle<Result<AnalysisReport>>,
}

impl AnalysisHandle {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub async fn wait(self) -> Result<AnalysisReport> {
        self.task
            .await
            .map_err(|e| MemoryError::Analysis(format!("analysis task for {} failed: {}", self.chat_id, e)))?
    }
}

pub struct AppendOutcome {
    pub message: Message,
    pub chat_id: String,
    pub created_chat: bool,
    /// `None` when the policy skipped this message
    pub analysis: Option<AnalysisHandle>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatExport {
    format: String,
    exported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    chat: serde_json::Value,
}

pub struct MemoryService {
    db: Arc<MemoryDatabase>,
    summarizer: Arc<dyn Summarizer>,
    scheduler: Arc<AnalysisScheduler>,
    retriever: ContextRetriever,
    locks: Arc<ChatLocks>,
    config: MemoryConfig,
    current_chat: RwLock<Option<String>>,
}

impl MemoryService {
    pub fn new(db: Arc<MemoryDatabase>, summarizer: Arc<dyn Summarizer>, config: MemoryConfig) -> Result<Self> {
        db.conversations.rebuild_index()?;

        let locks = Arc::new(ChatLocks::new());
        let scheduler = Arc::new(AnalysisScheduler::new(
            Arc::clone(&db),
            Arc::clone(&summarizer),
            Arc::clone(&locks),
            &config,
        ));
        let retriever = ContextRetriever::new(Arc::clone(&db), &config);

        info!("Memory service ready");
        Ok(Self {
            db,
            summarizer,
            scheduler,
            retriever,
            locks,
            config,
            current_chat: RwLock::new(None),
        })
    }

    /// Replace the trigger policy
    pub fn with_analysis_policy(mut self, policy: Arc<dyn AnalysisPolicy>) -> Self {
        self.scheduler = Arc::new(
            AnalysisScheduler::new(
                Arc::clone(&self.db),
                Arc::clone(&self.summarizer),
                Arc::clone(&self.locks),
                &self.config,
            )
            .with_policy(policy),
        );
        self
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.db
    }

    pub async fn current_chat_id(&self) -> Option<String> {
        self.current_chat.read().await.clone()
    }

    /// Point the service at an existing chat
    pub async fn set_current_chat(&self, chat_id: &str) -> Result<()> {
        if self.db.conversations.get_metadata(chat_id)?.is_none() {
            return Err(MemoryError::NotFound(chat_id.to_string()));
        }
        *self.current_chat.write().await = Some(chat_id.to_string());
        debug!("Current chat set to {}", chat_id);
        Ok(())
    }

    /// Start an empty chat titled from `first_message_text` and make it current
    pub async fn create_new_chat(&self, first_message_text: &str) -> Result<String> {
        let title = self.generate_title(first_message_text).await;
        let chat = ChatMemory::new(title);
        self.db.conversations.create(&chat)?;
        *self.current_chat.write().await = Some(chat.id.clone());
        info!("Started chat {} '{}'", chat.id, chat.title);
        Ok(chat.id)
    }

    async fn generate_title(&self, text: &str) -> String {
        let generated = tokio::time::timeout(
            self.config.summarizer_timeout(),
            self.summarizer.generate_title(text),
        )
        .await;

        let title = match generated {
            Ok(Ok(title)) => title.trim().to_string(),
            Ok(Err(e)) => {
                warn!("Title generation failed, using first words: {}", e);
                String::new()
            }
            Err(_) => {
                warn!("Title generation timed out, using first words");
                String::new()
            }
        };
        let title = if title.is_empty() {
            HeuristicSummarizer::title_from_text(text)
        } else {
            title
        };
        TextUtils::truncate_with_ellipsis(&title, self.config.title_max_chars).into_owned()
    }

    /// Append to the current chat, creating one when there is none.
    ///
    /// Analysis never makes this fail; it runs on its own task when the
    /// policy asks for it.
    pub async fn add_message(&self, message: Message) -> Result<AppendOutcome> {
        let mut created_chat = false;
        let mut chat_id = match self.current_chat_id().await {
            Some(id) => id,
            None => {
                created_chat = true;
                self.create_new_chat(&message.text()).await?
            }
        };

        let (stored, message_count) = match self.append_locked(&chat_id, &message).await {
            Err(MemoryError::NotFound(_)) if !created_chat => {
                warn!("Current chat {} no longer exists; starting a new one", chat_id);
                created_chat = true;
                chat_id = self.create_new_chat(&message.text()).await?;
                self.append_locked(&chat_id, &message).await?
            }
            other => other?,
        };

        let analysis = if self.scheduler.should_analyze(message_count, stored.role) {
            Some(self.spawn_analysis(&chat_id))
        } else {
            debug!("Skipping analysis of chat {} at {} messages", chat_id, message_count);
            None
        };

        Ok(AppendOutcome {
            message: stored,
            chat_id,
            created_chat,
            analysis,
        })
    }

    async fn append_locked(&self, chat_id: &str, message: &Message) -> Result<(Message, usize)> {
        let _append = self.locks.lock_append(chat_id).await;
        let stored = self.db.conversations.append_message(chat_id, message)?;
        let count = self.db.conversations.message_count(chat_id)?;
        Ok((stored, count))
    }

    fn spawn_analysis(&self, chat_id: &str) -> AnalysisHandle {
        let scheduler = Arc::clone(&self.scheduler);
        let id = chat_id.to_string();
        let task = tokio::spawn(async move {
            let result = scheduler.run_pass(&id).await;
            if let Err(e) = &result {
                error!("Analysis of chat {} failed: {}", id, e);
            }
            result
        });
        AnalysisHandle {
            chat_id: chat_id.to_string(),
            task,
        }
    }

    /// Load a chat with its messages and make it current
    pub async fn load_chat(&self, chat_id: &str) -> Result<ChatMemory> {
        let chat = self
            .db
            .conversations
            .get(chat_id)?
            .ok_or_else(|| MemoryError::NotFound(chat_id.to_string()))?;
        *self.current_chat.write().await = Some(chat.id.clone());
        Ok(chat)
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        let deleted = self.db.conversations.delete(chat_id)?;
        self.locks.forget(chat_id);

        let mut current = self.current_chat.write().await;
        if current.as_deref() == Some(chat_id) {
            *current = None;
            debug!("Cleared current chat pointer");
        }
        Ok(deleted)
    }

    pub async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<()> {
        let title = self.validate_title(title)?;
        if !self.db.conversations.rename_title(chat_id, &title)? {
            return Err(MemoryError::NotFound(chat_id.to_string()));
        }
        Ok(())
    }

    fn validate_title(&self, title: &str) -> Result<String> {
        let title = title.trim();
        if title.is_empty() {
            return Err(MemoryError::Validation("title must not be empty".to_string()));
        }
        let length = title.chars().count();
        if length > self.config.title_max_chars {
            return Err(MemoryError::Validation(format!(
                "title is {} characters, limit is {}",
                length, self.config.title_max_chars
            )));
        }
        Ok(title.to_string())
    }

    /// Every chat, oldest first
    pub fn list_chats(&self) -> Result<Vec<ChatMemory>> {
        self.db.conversations.get_all()
    }

    /// Snippets from other chats relevant to `current_text`
    pub async fn find_relevant_context(&self, current_text: &str) -> Result<Vec<String>> {
        let Some(chat_id) = self.current_chat_id().await else {
            return Ok(Vec::new());
        };
        self.retriever.find_relevant_context(Some(chat_id.as_str()), current_text)
    }

    pub fn context_retriever(&self) -> &ContextRetriever {
        &self.retriever
    }

    pub fn search_chats(&self, query: &str) -> Result<Vec<ChatMemory>> {
        let terms: BTreeSet<String> = extract_key_terms(query, self.config.query_term_limit)
            .into_iter()
            .collect();
        self.db.conversations.search_by_terms(&terms)
    }

    pub fn export_chat(&self, chat_id: &str) -> Result<String> {
        let chat = self
            .db
            .conversations
            .get(chat_id)?
            .ok_or_else(|| MemoryError::NotFound(chat_id.to_string()))?;

        let chat = serde_json::to_value(&chat)?;
        let export = ChatExport {
            format: EXPORT_FORMAT.to_string(),
            exported_at: Utc::now(),
            checksum: Some(checksum(&chat)?),
            chat,
        };
        info!("Exported chat {}", chat_id);
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Import an exported chat as a brand new chat. Nothing is written unless
    /// the whole document validates.
    pub fn import_chat(&self, serialized: &str) -> Result<String> {
        let export: ChatExport = serde_json::from_str(serialized)
            .map_err(|e| MemoryError::Validation(format!("malformed export: {}", e)))?;

        if export.format != EXPORT_FORMAT {
            return Err(MemoryError::Validation(format!("unsupported export format '{}'", export.format)));
        }
        if let Some(expected) = &export.checksum {
            if &checksum(&export.chat)? != expected {
                return Err(MemoryError::Validation("checksum mismatch".to_string()));
            }
        }

        let original: ChatMemory = serde_json::from_value(export.chat)
            .map_err(|e| MemoryError::Validation(format!("malformed chat record: {}", e)))?;
        let title = self.validate_title(&original.title)?;
        for (position, message) in original.messages.iter().enumerate() {
            validate_content(&message.content)
                .map_err(|reason| MemoryError::Validation(format!("message {}: {}", position, reason)))?;
        }

        let mut chat = ChatMemory::new(title);
        chat.summary = original.summary;
        chat.tags = normalize_tags(&original.tags);
        chat.key_terms = normalize_key_terms(original.key_terms);
        let chat_id = chat.id.clone();
        chat.messages = original
            .messages
            .into_iter()
            .map(|message| Message {
                id: Uuid::new_v4().to_string(),
                chat_id: chat_id.clone(),
                ..message
            })
            .collect();

        self.db.conversations.create(&chat)?;
        info!("Imported chat {} as {} ({} messages)", original.id, chat.id, chat.messages.len());
        Ok(chat.id)
    }

    pub fn get_chat_stats(&self) -> Result<ChatStats> {
        let chats = self.db.conversations.get_all_metadata()?;
        let total_messages = self.db.conversations.total_messages()?;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for tag in chats.iter().flat_map(|chat| chat.tags.iter()) {
            *counts.entry(tag.as_str()).or_insert(0) += 1;
        }
        let mut most_used_tags: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(tag, count)| (tag.to_string(), count))
            .collect();
        most_used_tags.sort_by(|(a_tag, a), (b_tag, b)| b.cmp(a).then_with(|| a_tag.cmp(b_tag)));
        most_used_tags.truncate(MOST_USED_TAGS);

        Ok(ChatStats {
            total_chats: chats.len(),
            total_messages,
            most_used_tags,
        })
    }

    pub fn get_bio(&self) -> Result<Option<ChatBio>> {
        self.db.bios.get_bio()
    }

    /// Remove the stored bio. Returns false when none was set.
    pub fn delete_bio(&self) -> Result<bool> {
        self.db.bios.delete_bio()
    }

    /// Replace the stored bio
    pub fn save_bio(&self, name: &str, content: &str) -> Result<ChatBio> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MemoryError::Validation("bio name must not be empty".to_string()));
        }
        let bio = ChatBio::new(name, content);
        self.db.bios.save_bio(&bio)?;
        Ok(bio)
    }
}

/// Lowercase, trim and dedupe imported key terms, keeping their order
fn normalize_key_terms(terms: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    terms
        .into_iter()
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty() && seen.insert(term.clone()))
        .collect()
}

/// blake3 of the compact JSON encoding
fn checksum(chat: &serde_json::Value) -> Result<String> {
    let canonical = serde_json::to_string(chat)?;
    Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
}

fn validate_content(content: &MessageContent) -> std::result::Result<(), String> {
    let segments = match content {
        MessageContent::Text(_) => return Ok(()),
        MessageContent::Segments(segments) => segments,
    };
    if segments.is_empty() {
        return Err("content has no segments".to_string());
    }
    for segment in segments {
        match segment {
            ContentSegment::Text { .. } => {}
            ContentSegment::Image { uri, .. } if uri.trim().is_empty() => {
                return Err("image segment without uri".to_string());
            }
            ContentSegment::Image { .. } => {}
            ContentSegment::ToolCall { id, name, .. } if id.is_empty() || name.is_empty() => {
                return Err("tool call without id or name".to_string());
            }
            ContentSegment::ToolCall { .. } => {}
            ContentSegment::ToolResult { call_id, .. } if call_id.is_empty() => {
                return Err("tool result without call id".to_string());
            }
            ContentSegment::ToolResult { .. } => {}
        }
    }
    Ok(())
}

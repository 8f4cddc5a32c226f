use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use crate::memory_db::term_index::TermIndex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

const CHAT_COLUMNS: &str =
    "id, title, summary, tags, key_terms, created_at, updated_at, last_message_at";
const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, created_at";

/// Persistent chats and their messages, plus the term index cache
pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
    index: TermIndex,
}

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self {
            pool,
            index: TermIndex::new(),
        }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Persist a new chat together with any messages it already carries
    pub fn create(&self, chat: &ChatMemory) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO chats (id, title, summary, tags, key_terms, created_at, updated_at, last_message_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &chat.id,
                &chat.title,
                &chat.summary,
                serde_json::to_string(&chat.tags)?,
                serde_json::to_string(&chat.key_terms)?,
                timestamp(&chat.created_at),
                timestamp(&chat.updated_at),
                timestamp(&chat.last_message_at),
            ],
        )?;

        for (seq, message) in chat.messages.iter().enumerate() {
            Self::insert_message(&tx, &chat.id, seq as i64, message)?;
        }

        tx.commit()?;

        if self.index.is_built() {
            self.index.upsert(chat);
        }
        info!("Created chat {} ({} messages)", chat.id, chat.messages.len());
        Ok(())
    }

    pub fn get(&self, chat_id: &str) -> Result<Option<ChatMemory>> {
        let mut chat = match self.get_metadata(chat_id)? {
            Some(chat) => chat,
            None => return Ok(None),
        };
        chat.messages = self.get_messages(chat_id)?;
        Ok(Some(chat))
    }

    /// Chat record without its messages
    pub fn get_metadata(&self, chat_id: &str) -> Result<Option<ChatMemory>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM chats WHERE id = ?1", CHAT_COLUMNS))?;
        let mut rows = stmt.query([chat_id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(self.row_to_chat(row)?))
        } else {
            Ok(None)
        }
    }

    /// Every chat with its messages, oldest first
    pub fn get_all(&self) -> Result<Vec<ChatMemory>> {
        let mut chats = self.get_all_metadata()?;
        let mut by_chat = self.all_messages_by_chat()?;
        for chat in chats.iter_mut() {
            chat.messages = by_chat.remove(&chat.id).unwrap_or_default();
        }
        Ok(chats)
    }

    /// Every chat record without messages, oldest first
    pub fn get_all_metadata(&self) -> Result<Vec<ChatMemory>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chats ORDER BY created_at ASC, id ASC",
            CHAT_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        let mut chats = Vec::new();

        while let Some(row) = rows.next()? {
            chats.push(self.row_to_chat(row)?);
        }

        Ok(chats)
    }

    /// Remove a chat and its messages. Unknown ids are a no-op.
    pub fn delete(&self, chat_id: &str) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let removed_messages = tx.execute("DELETE FROM messages WHERE chat_id = ?1", [chat_id])?;
        let deleted = tx.execute("DELETE FROM chats WHERE id = ?1", [chat_id])?;
        tx.commit()?;

        self.index.remove(chat_id);
        if deleted > 0 {
            info!("Deleted chat {} ({} messages)", chat_id, removed_messages);
        } else {
            debug!("Delete of unknown chat {} ignored", chat_id);
        }
        Ok(deleted > 0)
    }

    pub fn rename_title(&self, chat_id: &str, title: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, timestamp(&Utc::now()), chat_id],
        )?;

        if updated > 0 {
            info!("Updated chat {} title to: {}", chat_id, title);
        }
        Ok(updated > 0)
    }

    /// Append `message` at the end of the chat, stamping it with `chat_id`
    pub fn append_message(&self, chat_id: &str, message: &Message) -> Result<Message> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = timestamp(&Utc::now());

        let touched = tx.execute(
            "UPDATE chats SET updated_at = ?1, last_message_at = ?1 WHERE id = ?2",
            params![&now, chat_id],
        )?;
        if touched == 0 {
            return Err(MemoryError::NotFound(chat_id.to_string()));
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM messages WHERE chat_id = ?1",
            [chat_id],
            |row| row.get(0),
        )?;
        Self::insert_message(&tx, chat_id, seq, message)?;
        tx.commit()?;

        let mut stored = message.clone();
        stored.chat_id = chat_id.to_string();
        debug!("Appended {} message #{} to chat {}", stored.role, seq, chat_id);
        Ok(stored)
    }

    /// Messages in append order; empty for unknown chats
    pub fn get_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE chat_id = ?1 ORDER BY seq ASC",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query([chat_id])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(self.row_to_message(row)?);
        }
        Ok(messages)
    }

    pub fn message_count(&self, chat_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            [chat_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn total_messages(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Merge analysis output into the chat in one write.
    ///
    /// Returns `None` when the chat no longer exists, in which case nothing
    /// is written.
    pub fn apply_analysis(&self, chat_id: &str, update: &AnalysisUpdate) -> Result<Option<ChatMemory>> {
        {
            let mut conn = self.get_conn()?;
            let tx = conn.transaction()?;

            let current: Option<(String, String)> = tx
                .query_row(
                    "SELECT summary, tags FROM chats WHERE id = ?1",
                    [chat_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (previous_summary, previous_tags) = match current {
                Some(values) => values,
                None => {
                    debug!("Chat {} vanished before analysis write; discarding", chat_id);
                    return Ok(None);
                }
            };

            let summary = update.summary.clone().unwrap_or(previous_summary);
            let tags_json = match &update.tags {
                Some(tags) => serde_json::to_string(tags)?,
                None => previous_tags,
            };

            tx.execute(
                "UPDATE chats SET summary = ?1, tags = ?2, key_terms = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    summary,
                    tags_json,
                    serde_json::to_string(&update.key_terms)?,
                    timestamp(&Utc::now()),
                    chat_id,
                ],
            )?;
            tx.commit()?;
        }

        let chat = self.get_metadata(chat_id)?;
        if let Some(ref chat) = chat {
            if self.index.is_built() {
                self.index.upsert(chat);
            }
        }
        Ok(chat)
    }

    /// Chats whose tags or key terms intersect `terms`, most overlap first
    /// and most recently active among equals.
    pub fn search_by_terms(&self, terms: &BTreeSet<String>) -> Result<Vec<ChatMemory>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_index()?;

        let mut scored = Vec::new();
        for chat_id in self.index.candidates(terms) {
            // The index may be stale; the record decides.
            let Some(chat) = self.get(&chat_id)? else { continue };
            let overlap = term_overlap(&chat, terms);
            if overlap > 0 {
                scored.push((overlap, chat));
            }
        }

        scored.sort_by(|(a_overlap, a), (b_overlap, b)| {
            b_overlap
                .cmp(a_overlap)
                .then_with(|| b.last_message_at.cmp(&a.last_message_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        debug!("Term search over {} terms matched {} chats", terms.len(), scored.len());
        Ok(scored.into_iter().map(|(_, chat)| chat).collect())
    }

    /// Rebuild the term index from the chats table
    pub fn rebuild_index(&self) -> Result<()> {
        let chats = self.get_all_metadata()?;
        self.index.rebuild(&chats);
        Ok(())
    }

    fn ensure_index(&self) -> Result<()> {
        if !self.index.is_built() {
            self.rebuild_index()?;
        }
        Ok(())
    }

    fn insert_message(conn: &Connection, chat_id: &str, seq: i64, message: &Message) -> Result<()> {
        conn.execute(
            "INSERT INTO messages (id, chat_id, seq, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &message.id,
                chat_id,
                seq,
                message.role.as_str(),
                serde_json::to_string(&message.content)?,
                timestamp(&message.created_at),
            ],
        )?;
        Ok(())
    }

    fn all_messages_by_chat(&self) -> Result<HashMap<String, Vec<Message>>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages ORDER BY chat_id ASC, seq ASC",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        let mut by_chat: HashMap<String, Vec<Message>> = HashMap::new();
        while let Some(row) = rows.next()? {
            let message = self.row_to_message(row)?;
            by_chat.entry(message.chat_id.clone()).or_default().push(message);
        }
        Ok(by_chat)
    }

    fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn row_timestamp(row: &Row, idx: usize, column: &str) -> Result<DateTime<Utc>> {
        let raw: String = row.get(idx)?;
        Ok(Self::parse_datetime_safe(&raw).unwrap_or_else(|| {
            warn!("Failed parse {}: {}", column, raw);
            Utc::now()
        }))
    }

    fn row_to_chat(&self, row: &Row) -> Result<ChatMemory> {
        let tags: BTreeSet<String> = serde_json::from_str(&row.get::<_, String>(3)?)?;
        let key_terms: Vec<String> = serde_json::from_str(&row.get::<_, String>(4)?)?;

        Ok(ChatMemory {
            id: row.get(0)?,
            title: row.get(1)?,
            messages: Vec::new(),
            tags,
            summary: row.get(2)?,
            key_terms,
            created_at: Self::row_timestamp(row, 5, "created_at")?,
            updated_at: Self::row_timestamp(row, 6, "updated_at")?,
            last_message_at: Self::row_timestamp(row, 7, "last_message_at")?,
        })
    }

    fn row_to_message(&self, row: &Row) -> Result<Message> {
        let role: String = row.get(2)?;
        let role = role.parse::<MessageRole>().map_err(MemoryError::Storage)?;
        let content: MessageContent = serde_json::from_str(&row.get::<_, String>(3)?)?;

        Ok(Message {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            role,
            content,
            created_at: Self::row_timestamp(row, 4, "message created_at")?,
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Number of `terms` found in the chat's tags or key terms
pub fn term_overlap(chat: &ChatMemory, terms: &BTreeSet<String>) -> usize {
    let key_terms: HashSet<&String> = chat.key_terms.iter().collect();
    terms
        .iter()
        .filter(|term| chat.tags.contains(*term) || key_terms.contains(term))
        .count()
}

/// Most recent activity first, then id for a stable order
pub fn by_recency(a: &ChatMemory, b: &ChatMemory) -> Ordering {
    b.last_message_at
        .cmp(&a.last_message_at)
        .then_with(|| a.id.cmp(&b.id))
}

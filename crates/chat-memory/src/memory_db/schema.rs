//! Record types persisted by the memory database
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("unknown message role '{}'", other)),
        }
    }
}

/// One typed piece of a multi-part message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSegment {
    Text {
        text: String,
    },
    Image {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Segments(Vec<ContentSegment>),
}

impl MessageContent {
    /// Flattened text used for analysis. Images contribute nothing.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Segments(segments) => segments
                .iter()
                .filter_map(|segment| match segment {
                    ContentSegment::Text { text } => Some(text.clone()),
                    ContentSegment::Image { .. } => None,
                    ContentSegment::ToolCall { name, arguments, .. } => {
                        if arguments.is_null() {
                            Some(name.clone())
                        } else {
                            Some(format!("{} {}", name, arguments))
                        }
                    }
                    ContentSegment::ToolResult { output, .. } => Some(output.clone()),
                })
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.trim().is_empty(),
            MessageContent::Segments(segments) => segments.is_empty(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Empty until the message is appended to a chat.
    #[serde(default)]
    pub chat_id: String,
    pub role: MessageRole,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<MessageContent>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: String::new(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Tool, content)
    }

    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// A conversation with its messages and derived metadata.
///
/// `tags`, `summary` and `key_terms` lag behind `messages` between analysis
/// passes but are always computed from a prefix of this chat's own messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMemory {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub summary: String,
    /// Extractor rank order, deduplicated.
    #[serde(default)]
    pub key_terms: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

impl ChatMemory {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            tags: BTreeSet::new(),
            summary: String::new(),
            key_terms: Vec::new(),
            created_at: now,
            updated_at: now,
            last_message_at: now,
        }
    }

    /// Message bodies joined in conversation order
    pub fn concatenated_text(&self) -> String {
        concatenate_messages(&self.messages)
    }
}

pub fn concatenate_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(Message::text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Metadata produced by one analysis pass. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct AnalysisUpdate {
    pub summary: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub key_terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatBio {
    pub id: String,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatBio {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStats {
    pub total_chats: usize,
    pub total_messages: usize,
    /// Top tags with the number of chats carrying each one
    pub most_used_tags: Vec<(String, usize)>,
}

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub total_chats: i64,
    pub total_messages: i64,
    pub has_bio: bool,
    pub database_size_bytes: i64,
}

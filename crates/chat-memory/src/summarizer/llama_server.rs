//! Summarizer backed by a local llama-server process.
//!
//! Requests go to the OpenAI-compatible `/v1/chat/completions` endpoint,
//! non-streaming. Replies are plain text and cleaned up before use.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::memory_db::{Message, MessageRole};
use crate::summarizer::{normalize_tags, Summarizer};
use crate::utils::TextUtils;

const TITLE_PROMPT: &str = "Write a short title (at most six words) for a conversation that starts with the message below. Reply with the title only.";
const SUMMARY_PROMPT: &str = "Summarize the conversation above in two or three sentences. Reply with the summary only.";
const TAGS_PROMPT: &str = "List up to five short topic tags for the conversation above, separated by commas. Reply with the tags only.";

/// Longest transcript slice sent for one request
const MAX_TRANSCRIPT_CHARS: usize = 12_000;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

pub struct LlamaServerSummarizer {
    backend_url: String,
    http_client: reqwest::Client,
}

impl LlamaServerSummarizer {
    pub fn new(backend_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        info!("Llama summarizer initialized with backend: {}", backend_url);
        Ok(Self {
            backend_url: backend_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.backend_url)
    }

    /// Transcript as OpenAI chat messages. Tool output is passed as user
    /// text because llama-server templates reject unknown roles.
    fn to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
        let mut budget = MAX_TRANSCRIPT_CHARS;
        let mut out: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter_map(|m| {
                if budget == 0 {
                    return None;
                }
                let text = m.text();
                if text.trim().is_empty() {
                    return None;
                }
                let text = TextUtils::truncate_with_ellipsis(&text, budget).into_owned();
                budget = budget.saturating_sub(text.chars().count());
                let role = match m.role {
                    MessageRole::Assistant => "assistant",
                    MessageRole::User | MessageRole::Tool => "user",
                };
                Some(ChatMessage {
                    role: role.to_string(),
                    content: text,
                })
            })
            .collect();
        out.reverse();
        out
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<String> {
        let request = ChatCompletionRequest {
            model: "local-llm".to_string(),
            messages,
            max_tokens,
            temperature,
            stream: false,
        };

        let response = self.http_client
            .post(&self.completions_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Summarizer request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Summarizer backend returned {}: {}", status, body));
        }

        let completion: ChatCompletionResponse = response.json().await
            .map_err(|e| anyhow::anyhow!("Failed to parse summarizer response: {}", e))?;

        Ok(completion.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default())
    }

    fn with_instruction(messages: &[Message], instruction: &str) -> Vec<ChatMessage> {
        let mut chat = Self::to_chat_messages(messages);
        chat.push(ChatMessage {
            role: "user".to_string(),
            content: instruction.to_string(),
        });
        chat
    }
}

/// Split a comma or newline separated reply, stripping list markers
fn parse_tags(reply: &str) -> BTreeSet<String> {
    normalize_tags(
        reply
            .split(|c: char| c == ',' || c == '\n' || c == ';')
            .map(|t| t.trim().trim_start_matches(|c: char| c == '-' || c == '*' || c.is_ascii_digit() || c == '.')),
    )
}

#[async_trait]
impl Summarizer for LlamaServerSummarizer {
    async fn generate_title(&self, text: &str) -> anyhow::Result<String> {
        debug!("Generating title for prompt ({} chars)", text.len());
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: TITLE_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: TextUtils::truncate_with_ellipsis(text, 2_000).into_owned(),
            },
        ];
        let reply = self.complete(messages, 20, 0.3).await?;
        let title = reply
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .trim()
            .to_string();
        if title.is_empty() {
            return Err(anyhow::anyhow!("Summarizer returned an empty title"));
        }
        info!("Generated title: '{}'", title);
        Ok(title)
    }

    async fn generate_summary(&self, messages: &[Message]) -> anyhow::Result<String> {
        debug!("Generating summary for {} messages", messages.len());
        let reply = self
            .complete(Self::with_instruction(messages, SUMMARY_PROMPT), 200, 0.3)
            .await?;
        Ok(TextUtils::normalize_whitespace(&reply).into_owned())
    }

    async fn generate_tags(&self, messages: &[Message]) -> anyhow::Result<BTreeSet<String>> {
        debug!("Generating tags for {} messages", messages.len());
        let reply = self
            .complete(Self::with_instruction(messages, TAGS_PROMPT), 40, 0.2)
            .await?;
        Ok(parse_tags(&reply))
    }
}

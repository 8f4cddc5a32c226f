// chat-memory/crates/chat-memory/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarizerKind {
    /// Offline heuristics, no model required
    Heuristic,
    /// OpenAI-compatible llama-server endpoint
    Llama,
}

impl FromStr for SummarizerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "heuristic" | "local" => Ok(SummarizerKind::Heuristic),
            "llama" | "llama-server" => Ok(SummarizerKind::Llama),
            other => Err(anyhow::anyhow!("Unknown SUMMARIZER '{}': expected 'heuristic' or 'llama'", other)),
        }
    }
}

/// Tuning knobs for analysis scheduling and context retrieval.
///
/// The defaults are the historical heuristics; none of them is load-bearing.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub db_path: PathBuf,
    pub summarizer: SummarizerKind,
    pub llama_host: String,
    pub llama_port: u16,
    pub backend_url: String,
    pub summarizer_timeout_seconds: u64,
    pub key_term_limit: usize,
    pub query_term_limit: usize,
    pub context_top_k: usize,
    pub context_tag_weight: usize,
    pub context_snippet_chars: usize,
    pub context_max_tags: usize,
    pub analysis_warmup_messages: usize,
    pub analysis_refresh_interval: usize,
    pub title_max_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let llama_host = "127.0.0.1".to_string();
        let llama_port = 8081;
        Self {
            db_path: PathBuf::from("./data/chat_memory.db"),
            summarizer: SummarizerKind::Heuristic,
            backend_url: format!("http://{}:{}", llama_host, llama_port),
            llama_host,
            llama_port,
            summarizer_timeout_seconds: 30,
            key_term_limit: 15,
            query_term_limit: 5,
            context_top_k: 3,
            context_tag_weight: 2,
            context_snippet_chars: 280,
            context_max_tags: 5,
            analysis_warmup_messages: 5,
            analysis_refresh_interval: 3,
            title_max_chars: 120,
        }
    }
}

impl MemoryConfig {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let defaults = Self::default();

        let llama_host = env::var("LLAMA_HOST").unwrap_or_else(|_| defaults.llama_host.clone());
        let llama_port: u16 = parse_var("LLAMA_PORT", defaults.llama_port)?;
        let backend_url = format!("http://{}:{}", llama_host, llama_port);

        let config = Self {
            db_path: env::var("CHAT_MEMORY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            summarizer: parse_var("SUMMARIZER", defaults.summarizer)?,
            llama_host,
            llama_port,
            backend_url,
            summarizer_timeout_seconds: parse_var("SUMMARIZER_TIMEOUT_SECONDS", defaults.summarizer_timeout_seconds)?,
            key_term_limit: parse_var("KEY_TERM_LIMIT", defaults.key_term_limit)?,
            query_term_limit: parse_var("QUERY_TERM_LIMIT", defaults.query_term_limit)?,
            context_top_k: parse_var("CONTEXT_TOP_K", defaults.context_top_k)?,
            context_tag_weight: parse_var("CONTEXT_TAG_WEIGHT", defaults.context_tag_weight)?,
            context_snippet_chars: parse_var("CONTEXT_SNIPPET_CHARS", defaults.context_snippet_chars)?,
            context_max_tags: parse_var("CONTEXT_MAX_TAGS", defaults.context_max_tags)?,
            analysis_warmup_messages: parse_var("ANALYSIS_WARMUP_MESSAGES", defaults.analysis_warmup_messages)?,
            analysis_refresh_interval: parse_var("ANALYSIS_REFRESH_INTERVAL", defaults.analysis_refresh_interval)?,
            title_max_chars: parse_var("TITLE_MAX_CHARS", defaults.title_max_chars)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis_refresh_interval == 0 {
            return Err(anyhow::anyhow!("ANALYSIS_REFRESH_INTERVAL must be at least 1"));
        }
        if self.title_max_chars == 0 {
            return Err(anyhow::anyhow!("TITLE_MAX_CHARS must be at least 1"));
        }
        if self.summarizer_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("SUMMARIZER_TIMEOUT_SECONDS must be at least 1"));
        }
        Ok(())
    }

    pub fn summarizer_timeout(&self) -> Duration {
        Duration::from_secs(self.summarizer_timeout_seconds)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {}", self.db_path.display());
        info!("- Summarizer: {:?}", self.summarizer);
        info!("- Backend URL: {}", self.backend_url);
        info!("- Summarizer Timeout: {}s", self.summarizer_timeout_seconds);
        info!("- Key Terms: {} per chat, {} per query", self.key_term_limit, self.query_term_limit);
        info!(
            "- Context: top {}, tag weight {}, snippet {} chars, {} tags",
            self.context_top_k, self.context_tag_weight, self.context_snippet_chars, self.context_max_tags
        );
        info!(
            "- Analysis: warm-up {} messages, refresh every {}",
            self.analysis_warmup_messages, self.analysis_refresh_interval
        );
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_policy() {
        let config = MemoryConfig::default();
        assert_eq!(config.key_term_limit, 15);
        assert_eq!(config.query_term_limit, 5);
        assert_eq!(config.context_top_k, 3);
        assert_eq!(config.context_tag_weight, 2);
        assert_eq!(config.context_snippet_chars, 280);
        assert_eq!(config.analysis_warmup_messages, 5);
        assert_eq!(config.analysis_refresh_interval, 3);
        assert_eq!(config.summarizer, SummarizerKind::Heuristic);
        assert_eq!(config.backend_url, "http://127.0.0.1:8081");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_summarizer_kind_parsing() {
        assert_eq!("llama".parse::<SummarizerKind>().unwrap(), SummarizerKind::Llama);
        assert_eq!(" Heuristic ".parse::<SummarizerKind>().unwrap(), SummarizerKind::Heuristic);
        assert!("gpt".parse::<SummarizerKind>().is_err());
    }

    #[test]
    fn test_parse_var_reads_and_rejects() {
        // Names unique to this test so parallel tests do not interfere.
        env::set_var("CHAT_MEMORY_TEST_TOP_K", "7");
        assert_eq!(parse_var("CHAT_MEMORY_TEST_TOP_K", 3usize).unwrap(), 7);

        env::set_var("CHAT_MEMORY_TEST_BAD", "seven");
        let err = parse_var("CHAT_MEMORY_TEST_BAD", 3usize).unwrap_err();
        assert!(err.to_string().contains("CHAT_MEMORY_TEST_BAD"));

        assert_eq!(parse_var("CHAT_MEMORY_TEST_UNSET", 11usize).unwrap(), 11);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = MemoryConfig {
            analysis_refresh_interval: 0,
            ..MemoryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_duration() {
        let config = MemoryConfig {
            summarizer_timeout_seconds: 12,
            ..MemoryConfig::default()
        };
        assert_eq!(config.summarizer_timeout(), Duration::from_secs(12));
    }
}

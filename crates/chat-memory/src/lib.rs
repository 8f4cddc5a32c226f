// chat-memory/crates/chat-memory/src/lib.rs

pub mod config;
pub mod context_engine;
pub mod error;
pub mod memory_db;
pub mod summarizer;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::{MemoryConfig, SummarizerKind};
pub use context_engine::{
    create_default_service, AnalysisHandle, AnalysisOutcome, AnalysisPolicy, AnalysisReport,
    AppendOutcome, ContextRetriever, DefaultAnalysisPolicy, MemoryService,
};
pub use error::{MemoryError, Result};
pub use memory_db::{
    ChatBio, ChatMemory, ChatStats, ContentSegment, MemoryDatabase, Message, MessageContent,
    MessageRole,
};
pub use summarizer::{HeuristicSummarizer, LlamaServerSummarizer, Summarizer};
pub use utils::{extract_key_terms, TermExtractor};

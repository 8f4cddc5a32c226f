//! Context engine module - analysis scheduling, cross-chat retrieval and the
//! memory service that ties them to the store

pub mod analysis_scheduler;
pub mod chat_locks;
pub mod context_retriever;
pub mod memory_service;

pub use analysis_scheduler::{
    AnalysisOutcome, AnalysisPolicy, AnalysisReport, AnalysisScheduler, DefaultAnalysisPolicy,
};
pub use chat_locks::ChatLocks;
pub use context_retriever::{ContextRetriever, ScoredChat};
pub use memory_service::{AnalysisHandle, AppendOutcome, MemoryService, EXPORT_FORMAT};

use std::sync::Arc;

use crate::config::MemoryConfig;
use crate::memory_db::MemoryDatabase;

/// Open the configured database and summarizer and build a service on them
pub fn create_default_service(config: MemoryConfig) -> anyhow::Result<MemoryService> {
    let database = Arc::new(MemoryDatabase::new(&config.db_path)?);
    let summarizer = crate::summarizer::from_config(&config)?;
    Ok(MemoryService::new(database, summarizer, config)?)
}

//! Scripted summarizer for exercising the service without a model

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{MutexGuard, Notify};

use crate::memory_db::Message;
use crate::summarizer::Summarizer;

#[derive(Debug, Clone)]
pub enum Reply<T> {
    Value(T),
    Fail,
    /// Never resolves; only a timeout ends the call
    Hang,
}

pub struct ScriptedSummarizer {
    title: Mutex<Reply<String>>,
    /// `{n}` is replaced with the number of messages received
    summary: Mutex<Reply<String>>,
    tags: Mutex<Reply<BTreeSet<String>>>,
    gate: tokio::sync::Mutex<()>,
    entered: Notify,
    pub summary_calls: AtomicUsize,
    pub tag_calls: AtomicUsize,
}

impl Default for ScriptedSummarizer {
    fn default() -> Self {
        Self {
            title: Mutex::new(Reply::Value("Scripted Title".to_string())),
            summary: Mutex::new(Reply::Value("summary of {n} messages".to_string())),
            tags: Mutex::new(Reply::Value(tag_set(&["scripted"]))),
            gate: tokio::sync::Mutex::new(()),
            entered: Notify::new(),
            summary_calls: AtomicUsize::new(0),
            tag_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails
    pub fn failing() -> Self {
        let summarizer = Self::default();
        summarizer.set_title(Reply::Fail);
        summarizer.set_summary(Reply::Fail);
        summarizer.set_tags(Reply::Fail);
        summarizer
    }

    pub fn set_title(&self, reply: Reply<String>) {
        *self.title.lock().unwrap() = reply;
    }

    pub fn set_summary(&self, reply: Reply<String>) {
        *self.summary.lock().unwrap() = reply;
    }

    pub fn set_tags(&self, reply: Reply<BTreeSet<String>>) {
        *self.tags.lock().unwrap() = reply;
    }

    /// Summary and tag calls wait at the gate until the guard is dropped
    pub async fn hold(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Resolves once a summary or tag call has started
    pub async fn wait_entered(&self) {
        self.entered.notified().await
    }

    pub fn analysis_calls(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
    }
}

pub fn tag_set(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

async fn resolve<T: Send>(reply: Reply<T>) -> anyhow::Result<T> {
    match reply {
        Reply::Value(value) => Ok(value),
        Reply::Fail => Err(anyhow::anyhow!("scripted summarizer failure")),
        Reply::Hang => std::future::pending::<anyhow::Result<T>>().await,
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn generate_title(&self, _text: &str) -> anyhow::Result<String> {
        let reply = self.title.lock().unwrap().clone();
        resolve(reply).await
    }

    async fn generate_summary(&self, messages: &[Message]) -> anyhow::Result<String> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        drop(self.gate.lock().await);
        let reply = match self.summary.lock().unwrap().clone() {
            Reply::Value(template) => Reply::Value(template.replace("{n}", &messages.len().to_string())),
            other => other,
        };
        resolve(reply).await
    }

    async fn generate_tags(&self, _messages: &[Message]) -> anyhow::Result<BTreeSet<String>> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        drop(self.gate.lock().await);
        let reply = self.tags.lock().unwrap().clone();
        resolve(reply).await
    }
}

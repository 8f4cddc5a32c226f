//! Per-chat serialization of appends and analysis passes

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Two independent lock families keyed by chat id.
///
/// The append lock covers only the durable message write, so appends never
/// wait on a Summarizer call. The analysis lock is held for a whole pass;
/// tokio mutexes are fair, so passes for one chat run in arrival order.
#[derive(Default)]
pub struct ChatLocks {
    append: LockMap,
    analysis: LockMap,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_append(&self, chat_id: &str) -> OwnedMutexGuard<()> {
        Self::entry(&self.append, chat_id).lock_owned().await
    }

    pub async fn lock_analysis(&self, chat_id: &str) -> OwnedMutexGuard<()> {
        Self::entry(&self.analysis, chat_id).lock_owned().await
    }

    /// Drop both locks of a deleted chat. Holders keep their guards.
    pub fn forget(&self, chat_id: &str) {
        self.append.remove(chat_id);
        self.analysis.remove(chat_id);
    }

    fn entry(map: &LockMap, chat_id: &str) -> Arc<Mutex<()>> {
        map.entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_append_does_not_wait_for_analysis() {
        let locks = ChatLocks::new();
        let _analysis = locks.lock_analysis("chat").await;

        let append = tokio::time::timeout(Duration::from_millis(200), locks.lock_append("chat")).await;
        assert!(append.is_ok());
    }

    #[tokio::test]
    async fn test_same_chat_is_exclusive() {
        let locks = ChatLocks::new();
        let _first = locks.lock_analysis("chat").await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock_analysis("chat")).await;
        assert!(second.is_err());

        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock_analysis("other")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_forget_drops_entries() {
        let locks = ChatLocks::new();
        drop(locks.lock_append("a").await);
        drop(locks.lock_analysis("a").await);
        drop(locks.lock_append("b").await);
        assert_eq!(locks.append.len(), 2);

        locks.forget("a");
        assert_eq!(locks.append.len(), 1);
        assert!(!locks.analysis.contains_key("a"));
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

/// Memoization cache shared across resolutions. Keys are written once and
/// never invalidated; stale values persist for the store's lifetime.
#[async_trait::async_trait]
pub trait MemoCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store a value under `key`. Memoize-once: an existing entry wins.
    async fn put(&self, key: &str, value: Value);
}

/// Build a cache key from an operation identity and its arguments.
#[must_use]
pub fn memo_key(op: &str, args: &[&str]) -> String {
    let mut key = String::from(op);
    for arg in args {
        key.push('\x1f');
        key.push_str(arg);
    }
    key
}

/// In-memory backing store, used for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<dyn MemoCache> {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl MemoCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: &str, value: Value) {
        self.entries
            .write()
            .await
            .entry(key.to_string())
            .or_insert(value);
    }
}

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::KeyValueStore;

/// Non-persistent [`KeyValueStore`]; values live as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without going through the async API
    pub fn insert(&self, key: &str, value: serde_json::Value) {
        self.entries.lock().insert(key.to_owned(), value);
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::KeyValueStore;

/// [`KeyValueStore`] backed by a single JSON object on disk
///
/// The file is read on first access. `set` only touches the in-memory copy;
/// nothing reaches disk until [`KeyValueStore::flush`]. Reading a corrupt file
/// is an error, but writing over one moves it to `*.json.corrupt` first.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Option<Map<String, Value>>>,
}

impl JsonFileStore {
    /// Store at `path`; the file need not exist yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    /// Backing file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw file contents, `None` if the file is missing or blank
    async fn read_contents(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(None),
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("store file {} does not exist yet", self.path.display());
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    fn parse(&self, contents: &str) -> Result<Map<String, Value>> {
        serde_json::from_str(contents)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    async fn read_file(&self) -> Result<Map<String, Value>> {
        match self.read_contents().await? {
            Some(contents) => self.parse(&contents),
            None => Ok(Map::new()),
        }
    }

    /// Map to write into; an unparseable file is moved aside and replaced
    async fn read_file_for_write(&self) -> Result<Map<String, Value>> {
        let Some(contents) = self.read_contents().await? else {
            return Ok(Map::new());
        };
        match self.parse(&contents) {
            Ok(map) => Ok(map),
            Err(e) => {
                let backup = self.path.with_extension("json.corrupt");
                tracing::warn!(
                    "{:#}, moving it to {} and starting empty",
                    e,
                    backup.display()
                );
                tokio::fs::rename(&self.path, &backup)
                    .await
                    .with_context(|| format!("failed to move aside {}", self.path.display()))?;
                Ok(Map::new())
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().await;
        if entries.is_none() {
            *entries = Some(self.read_file().await?);
        }
        Ok(entries.as_ref().and_then(|map| map.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let map = match entries.take() {
            Some(map) => map,
            None => self.read_file_for_write().await?,
        };
        entries.insert(map).insert(key.to_owned(), value);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let entries = self.entries.lock().await;
        let Some(map) = entries.as_ref() else {
            // Nothing loaded means nothing staged
            return Ok(());
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(map).context("failed to encode store")?;

        // Write to a sibling temp file then rename so a crash never leaves a torn file
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;

        if cfg!(windows) {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to replace {}", self.path.display()));
                }
            }
        }

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| {
                format!(
                    "failed to rename {} to {}",
                    tmp_path.display(),
                    self.path.display()
                )
            })?;

        tracing::debug!("store flushed to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{default_bindings, BindingStore, ChordDescriptor, TOGGLE_RECORDING};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("bindings.json"));
        assert_eq!(store.get("bindings").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_is_not_persisted_until_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bindings.json");
        let store = JsonFileStore::new(&path);

        store.set("answer", json!(42)).await.unwrap();
        assert!(!path.exists());
        assert_eq!(store.get("answer").await.unwrap(), Some(json!(42)));

        store.flush().await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_flush_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("bindings.json");

        let first = JsonFileStore::new(&path);
        first.set("a", json!({"x": 1})).await.unwrap();
        first.set("b", json!("two")).await.unwrap();
        first.flush().await.unwrap();

        let second = JsonFileStore::new(&path);
        assert_eq!(second.get("a").await.unwrap(), Some(json!({"x": 1})));
        assert_eq!(second.get("b").await.unwrap(), Some(json!("two")));
    }

    #[tokio::test]
    async fn test_set_preserves_existing_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bindings.json");
        std::fs::write(&path, r#"{"other": true}"#).unwrap();

        let store = JsonFileStore::new(&path);
        store.set("bindings", json!({})).await.unwrap();
        store.flush().await.unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("other").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bindings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(store.get("bindings").await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_file_load_degrades_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bindings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = BindingStore::new(Arc::new(JsonFileStore::new(&path)), default_bindings());
        assert_eq!(store.load().await, default_bindings());
    }

    #[tokio::test]
    async fn test_save_after_corrupt_load_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bindings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = BindingStore::new(Arc::new(JsonFileStore::new(&path)), default_bindings());
        let mut loaded = store.load().await;
        assert_eq!(loaded, default_bindings());

        if let Some(binding) = loaded.get_mut(TOGGLE_RECORDING) {
            binding.key = ChordDescriptor::new("ctrl+alt+space");
        }
        store.save(&loaded).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(path.with_extension("json.corrupt")).unwrap(),
            "{ not json"
        );
        let reader = BindingStore::new(Arc::new(JsonFileStore::new(&path)), default_bindings());
        assert_eq!(reader.load().await.keys_by_id(), loaded.keys_by_id());
    }

    #[tokio::test]
    async fn test_binding_store_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bindings.json");

        let mut set = default_bindings();
        if let Some(binding) = set.get_mut(TOGGLE_RECORDING) {
            binding.key = ChordDescriptor::new("ctrl+alt+space");
        }
        let writer = BindingStore::new(Arc::new(JsonFileStore::new(&path)), default_bindings());
        writer.save(&set).await.unwrap();

        let reader = BindingStore::new(Arc::new(JsonFileStore::new(&path)), default_bindings());
        assert_eq!(reader.load().await.keys_by_id(), set.keys_by_id());
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{BindingSet, ChordDescriptor};
use crate::error::BindingError;

/// Key under which bindings are persisted
pub const BINDINGS_KEY: &str = "bindings";

/// Async key-value storage (enables testing via mocking)
///
/// Writes may be buffered until [`KeyValueStore::flush`] is called.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if absent
    ///
    /// # Errors
    /// Returns error if the backing storage cannot be read
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Stage a value
    ///
    /// # Errors
    /// Returns error if the value cannot be staged or written
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Persist staged values
    ///
    /// # Errors
    /// Returns error if the backing storage cannot be written
    async fn flush(&self) -> Result<()>;
}

/// Persisted projection of a binding; handlers are never stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredBinding {
    id: String,
    key: ChordDescriptor,
}

/// Loads and saves user binding overrides on top of compiled-in defaults
#[derive(Clone)]
pub struct BindingStore {
    store: Arc<dyn KeyValueStore>,
    defaults: BindingSet,
}

impl BindingStore {
    /// Create a store over `store` with the given defaults
    pub fn new(store: Arc<dyn KeyValueStore>, defaults: BindingSet) -> Self {
        Self { store, defaults }
    }

    /// Compiled-in defaults
    #[must_use]
    pub const fn defaults(&self) -> &BindingSet {
        &self.defaults
    }

    /// Load bindings: defaults with persisted chords applied by id
    ///
    /// Overrides for unknown ids or with empty chords are skipped. Overrides
    /// that leave two bindings on one chord are reverted to their defaults.
    /// Never fails. Storage or decode errors are logged and the defaults are
    /// returned, since losing customization beats losing hotkeys.
    pub async fn load(&self) -> BindingSet {
        let mut result = self.defaults.clone();

        let stored = match self.read_stored().await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("no persisted bindings, using defaults");
                return result;
            }
            Err(e) => {
                warn!(error = ?e, "failed to load bindings, falling back to defaults");
                return result;
            }
        };

        let mut overridden = BTreeSet::new();
        for (id, entry) in stored {
            if entry.key.is_empty() {
                warn!(id = %id, "ignoring persisted binding with empty chord");
                continue;
            }
            match result.get_mut(&id) {
                Some(binding) => {
                    binding.key = entry.key;
                    overridden.insert(id);
                }
                None => debug!(id = %id, "ignoring persisted binding with unknown id"),
            }
        }

        self.revert_collisions(&mut result, &mut overridden);
        result
    }

    /// Put overridden bindings that share a chord back on their defaults
    ///
    /// Repeats until every chord is unique, since a reverted default can itself
    /// collide with another override.
    fn revert_collisions(&self, set: &mut BindingSet, overridden: &mut BTreeSet<String>) {
        loop {
            let mut holders: BTreeMap<ChordDescriptor, Vec<String>> = BTreeMap::new();
            for binding in set.iter() {
                holders
                    .entry(binding.key.clone())
                    .or_default()
                    .push(binding.id.clone());
            }

            let mut reverted = Vec::new();
            for (chord, ids) in holders.into_iter().filter(|(_, ids)| ids.len() > 1) {
                warn!(chord = %chord, ids = ?ids, "persisted chords collide, reverting to defaults");
                reverted.extend(ids.into_iter().filter(|id| overridden.contains(id)));
            }
            if reverted.is_empty() {
                return;
            }

            for id in reverted {
                overridden.remove(&id);
                if let (Some(binding), Some(default)) = (set.get_mut(&id), self.defaults.get(&id)) {
                    binding.key = default.key.clone();
                }
            }
        }
    }

    /// Persist `{id, key}` pairs of `set` and flush
    ///
    /// # Errors
    /// Returns [`BindingError::Storage`] if encoding, writing or flushing fails
    pub async fn save(&self, set: &BindingSet) -> Result<(), BindingError> {
        match self.write_stored(set).await {
            Ok(()) => {
                debug!(count = set.len(), "bindings saved");
                Ok(())
            }
            Err(e) => {
                error!(error = ?e, "failed to save bindings");
                Err(BindingError::Storage(e))
            }
        }
    }

    /// Persist and return the defaults
    ///
    /// # Errors
    /// Returns [`BindingError::Storage`] if the defaults cannot be saved
    pub async fn reset_to_default(&self) -> Result<BindingSet, BindingError> {
        let defaults = self.defaults.clone();
        self.save(&defaults).await?;
        info!("bindings reset to defaults");
        Ok(defaults)
    }

    async fn read_stored(&self) -> Result<Option<BTreeMap<String, StoredBinding>>> {
        let Some(value) = self
            .store
            .get(BINDINGS_KEY)
            .await
            .context("failed to read bindings")?
        else {
            return Ok(None);
        };

        let stored = serde_json::from_value(value).context("failed to decode stored bindings")?;
        Ok(Some(stored))
    }

    async fn write_stored(&self, set: &BindingSet) -> Result<()> {
        let stored: BTreeMap<String, StoredBinding> = set
            .iter()
            .map(|binding| {
                (
                    binding.id.clone(),
                    StoredBinding {
                        id: binding.id.clone(),
                        key: binding.key.clone(),
                    },
                )
            })
            .collect();

        let value = serde_json::to_value(&stored).context("failed to encode bindings")?;
        self.store
            .set(BINDINGS_KEY, value)
            .await
            .context("failed to write bindings")?;
        self.store
            .flush()
            .await
            .context("failed to flush bindings store")?;
        Ok(())
    }
}

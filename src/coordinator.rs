use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::bindings::{BindingSet, BindingStore, ChordDescriptor};
use crate::error::BindingError;
use crate::registry::{ChordRegistry, CleanupReport};

/// Binding state published to the UI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingsView {
    /// Current bindings
    pub bindings: BindingSet,
    /// True while an operation is in flight
    pub is_loading: bool,
    /// Message from the last failed operation
    pub error: Option<String>,
}

/// Façade the UI talks to: owns the binding set, drives the registry, and is
/// the only writer of the binding store
///
/// Mutations queue on a fair lock, so they apply in request order.
pub struct BindingCoordinator {
    store: BindingStore,
    registry: Arc<ChordRegistry>,
    bindings: Mutex<BindingSet>,
    view: watch::Sender<BindingsView>,
}

impl BindingCoordinator {
    /// Create a coordinator; nothing is loaded or registered until [`Self::init`]
    pub fn new(store: BindingStore, registry: Arc<ChordRegistry>) -> Self {
        let initial = store.defaults().clone();
        let (view, _) = watch::channel(BindingsView {
            bindings: initial.clone(),
            is_loading: false,
            error: None,
        });
        Self {
            store,
            registry,
            bindings: Mutex::new(initial),
            view,
        }
    }

    /// Underlying registry
    #[must_use]
    pub const fn registry(&self) -> &Arc<ChordRegistry> {
        &self.registry
    }

    /// Live view for the UI
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BindingsView> {
        self.view.subscribe()
    }

    /// Current bindings
    pub async fn list(&self) -> BindingSet {
        self.bindings.lock().await.clone()
    }

    /// Load bindings from the store and register them all
    ///
    /// # Errors
    /// Propagates registry errors; see [`ChordRegistry::init`]
    pub async fn init(&self) -> Result<(), BindingError> {
        let mut bindings = self.bindings.lock().await;
        self.begin();

        *bindings = self.store.load().await;
        let result = self.registry.init(&bindings).await;

        self.finish(
            &bindings,
            result
                .as_ref()
                .err()
                .map(|e| format!("failed to register hotkeys: {e}")),
        );
        result
    }

    /// Unregister everything; see [`ChordRegistry::cleanup`]
    pub async fn cleanup(&self) -> CleanupReport {
        let _bindings = self.bindings.lock().await;
        self.registry.cleanup().await
    }

    /// Reload bindings from the store without touching registrations
    pub async fn refresh(&self) -> BindingSet {
        let mut bindings = self.bindings.lock().await;
        self.begin();
        *bindings = self.store.load().await;
        self.finish(&bindings, None);
        bindings.clone()
    }

    /// Rebind `id` to `chord`, re-register it, and persist
    ///
    /// On registration failure the previous chord stays bound. On save
    /// failure the new chord is live but not persisted.
    ///
    /// # Errors
    /// [`BindingError::NotFound`], [`BindingError::Conflict`],
    /// [`BindingError::Busy`], [`BindingError::Registration`] or
    /// [`BindingError::Storage`]
    pub async fn update(&self, id: &str, chord: ChordDescriptor) -> Result<(), BindingError> {
        let mut bindings = self.bindings.lock().await;
        self.begin();

        let result = self.update_locked(&mut bindings, id, &chord).await;

        self.finish(
            &bindings,
            result
                .as_ref()
                .err()
                .map(|e| format!("failed to update binding {id}: {e}")),
        );
        result
    }

    /// Reset `id` to its default chord
    ///
    /// # Errors
    /// [`BindingError::NotFound`] for ids without a default, otherwise as [`Self::update`]
    pub async fn delete(&self, id: &str) -> Result<(), BindingError> {
        let Some(default) = self.store.defaults().get(id).map(|b| b.key.clone()) else {
            let err = BindingError::NotFound(id.to_owned());
            self.view
                .send_modify(|view| view.error = Some(format!("failed to delete binding {id}: {err}")));
            return Err(err);
        };
        self.update(id, default).await
    }

    /// Persist the defaults and re-register them
    ///
    /// # Errors
    /// [`BindingError::Storage`] if the defaults cannot be saved, or registry
    /// errors from re-initialization
    pub async fn reset_all(&self) -> Result<(), BindingError> {
        let mut bindings = self.bindings.lock().await;
        self.begin();

        let result = match self.store.reset_to_default().await {
            Ok(defaults) => {
                *bindings = defaults;
                self.registry.init(&bindings).await
            }
            Err(e) => Err(e),
        };

        self.finish(
            &bindings,
            result
                .as_ref()
                .err()
                .map(|e| format!("failed to reset bindings: {e}")),
        );
        result
    }

    async fn update_locked(
        &self,
        bindings: &mut BindingSet,
        id: &str,
        chord: &ChordDescriptor,
    ) -> Result<(), BindingError> {
        let Some(current) = bindings.get(id).cloned() else {
            warn!(id = id, "update for unknown binding");
            return Err(BindingError::NotFound(id.to_owned()));
        };

        if let Some(holder) = bindings.id_for_chord(chord) {
            if holder != id {
                warn!(id = id, chord = %chord, holder = holder, "chord already in use");
                return Err(BindingError::Conflict {
                    chord: chord.clone(),
                    existing_id: holder.to_owned(),
                });
            }
        }

        self.registry.update_binding(&current, chord).await?;

        if let Some(binding) = bindings.get_mut(id) {
            binding.key = chord.clone();
        }
        self.store.save(bindings).await?;

        info!(id = id, chord = %chord, "binding saved");
        Ok(())
    }

    fn begin(&self) {
        self.view.send_modify(|view| {
            view.is_loading = true;
            view.error = None;
        });
    }

    fn finish(&self, bindings: &BindingSet, error: Option<String>) {
        self.view.send_replace(BindingsView {
            bindings: bindings.clone(),
            is_loading: false,
            error,
        });
    }
}

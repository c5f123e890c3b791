use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::bindings::{Binding, BindingSet, ChordDescriptor};
use crate::dispatcher::ActionDispatcher;
use crate::error::{BindingError, RegistrationOp};
use crate::input::hotkey::{ChordCallback, HotkeyBackend};

/// Registry lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No init has completed (or cleanup finished)
    Uninitialized,
    /// Registering bindings
    Initializing,
    /// All bindings registered
    Ready,
    /// Unregistering everything
    CleaningUp,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::CleaningUp => "cleaning up",
        })
    }
}

/// Per-chord outcome of a cleanup pass
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Chords the OS released
    pub unregistered: Vec<ChordDescriptor>,
    /// Chords the OS refused to release; dropped from the record anyway
    pub failed: Vec<(ChordDescriptor, anyhow::Error)>,
}

impl CleanupReport {
    /// True if every unregistration succeeded
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Chord -> binding id for every chord the OS currently holds for us
type RegistrationRecord = HashMap<ChordDescriptor, String>;

fn chord_for_id(record: &RegistrationRecord, id: &str) -> Option<ChordDescriptor> {
    record
        .iter()
        .find(|(_, holder)| holder.as_str() == id)
        .map(|(chord, _)| chord.clone())
}

/// Owns OS chord registrations
///
/// Keeps the mapping from registered chord to binding id in step with the OS:
/// every operation updates both or neither. All operations are serialized on
/// one async lock; the lifecycle is published separately so work arriving
/// mid-cleanup can be turned away without waiting.
pub struct ChordRegistry {
    backend: Arc<dyn HotkeyBackend>,
    dispatcher: Arc<ActionDispatcher>,
    record: Mutex<RegistrationRecord>,
    lifecycle: watch::Sender<Lifecycle>,
}

impl ChordRegistry {
    /// Create an uninitialized registry
    pub fn new(backend: Arc<dyn HotkeyBackend>, dispatcher: Arc<ActionDispatcher>) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Uninitialized);
        Self {
            backend,
            dispatcher,
            record: Mutex::new(HashMap::new()),
            lifecycle,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Watch lifecycle transitions
    #[must_use]
    pub fn subscribe_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Whether the last init completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lifecycle() == Lifecycle::Ready
    }

    /// Snapshot of active registrations, chord -> binding id
    pub async fn registrations(&self) -> BTreeMap<ChordDescriptor, String> {
        self.record
            .lock()
            .await
            .iter()
            .map(|(chord, id)| (chord.clone(), id.clone()))
            .collect()
    }

    /// Register every binding, after a full reset if anything is registered
    ///
    /// Bindings are registered in id order. The first failure is returned and
    /// the registry drops back to `Uninitialized`; chords registered before the
    /// failure stay registered and are released by the next cleanup.
    ///
    /// # Errors
    /// Returns the first [`BindingError::Registration`] encountered
    pub async fn init(&self, bindings: &BindingSet) -> Result<(), BindingError> {
        let mut record = self.record.lock().await;

        if self.lifecycle() == Lifecycle::Ready || !record.is_empty() {
            warn!(
                lifecycle = %self.lifecycle(),
                registered = record.len(),
                "registry already holds hotkeys, cleaning up before init"
            );
            self.cleanup_locked(&mut record).await;
        }

        self.set_lifecycle(Lifecycle::Initializing);
        for binding in bindings.iter() {
            if let Err(e) = self.register_locked(&mut record, binding).await {
                error!(
                    id = %binding.id,
                    chord = %binding.key,
                    registered = record.len(),
                    "hotkey init failed, keeping earlier registrations"
                );
                self.set_lifecycle(Lifecycle::Uninitialized);
                return Err(e);
            }
        }

        self.set_lifecycle(Lifecycle::Ready);
        info!(count = record.len(), "hotkeys initialized");
        Ok(())
    }

    /// Register one binding's chord
    ///
    /// A different binding holding the same chord is evicted first. If this
    /// binding already holds another chord, that one is released once the new
    /// chord is registered.
    ///
    /// # Errors
    /// [`BindingError::Busy`] during cleanup; [`BindingError::Registration`] if
    /// the OS refuses, in which case the record is unchanged
    pub async fn register(&self, binding: &Binding) -> Result<(), BindingError> {
        self.ensure_not_cleaning_up()?;
        let mut record = self.record.lock().await;
        self.register_locked(&mut record, binding).await
    }

    /// Release a chord; no-op if it is not registered
    ///
    /// # Errors
    /// [`BindingError::Busy`] during cleanup; [`BindingError::Registration`] if
    /// the OS refuses, in which case the record is unchanged
    pub async fn unregister(&self, chord: &ChordDescriptor) -> Result<(), BindingError> {
        self.ensure_not_cleaning_up()?;
        let mut record = self.record.lock().await;
        self.unregister_locked(&mut record, chord).await
    }

    /// Move `binding` from its registered chord to `new_chord`
    ///
    /// Only touches OS state; persisting the change is the caller's job. If the
    /// new chord cannot be registered the old one is restored.
    ///
    /// # Errors
    /// [`BindingError::Conflict`] if another binding holds `new_chord` (nothing
    /// changes); [`BindingError::Busy`] during cleanup;
    /// [`BindingError::Registration`] if the OS refuses
    pub async fn update_binding(
        &self,
        binding: &Binding,
        new_chord: &ChordDescriptor,
    ) -> Result<(), BindingError> {
        self.ensure_not_cleaning_up()?;
        let mut record = self.record.lock().await;

        if let Some(holder) = record.get(new_chord) {
            if holder != &binding.id {
                return Err(BindingError::Conflict {
                    chord: new_chord.clone(),
                    existing_id: holder.clone(),
                });
            }
        }

        let old = chord_for_id(&record, &binding.id);
        if old.as_ref() == Some(new_chord) {
            debug!(id = %binding.id, chord = %new_chord, "chord unchanged");
            return Ok(());
        }

        if let Some(old) = &old {
            self.unregister_locked(&mut record, old).await?;
        }

        let rebound = binding.with_key(new_chord.clone());
        if let Err(e) = self.register_locked(&mut record, &rebound).await {
            if let Some(old) = old {
                warn!(id = %binding.id, chord = %old, "restoring previous chord");
                let previous = binding.with_key(old);
                if let Err(restore) = self.register_locked(&mut record, &previous).await {
                    error!(
                        id = %binding.id,
                        error = %restore,
                        "failed to restore previous chord, binding is unregistered"
                    );
                }
            }
            return Err(e);
        }

        info!(id = %binding.id, chord = %new_chord, "binding updated");
        Ok(())
    }

    /// Release every registered chord and return to `Uninitialized`
    ///
    /// Best-effort: individual failures are collected in the report and do
    /// not stop the pass. Calling this while already clean is a no-op.
    pub async fn cleanup(&self) -> CleanupReport {
        let mut record = self.record.lock().await;
        self.cleanup_locked(&mut record).await
    }

    async fn cleanup_locked(&self, record: &mut RegistrationRecord) -> CleanupReport {
        let mut report = CleanupReport::default();
        if record.is_empty() && self.lifecycle() == Lifecycle::Uninitialized {
            debug!("nothing to clean up");
            return report;
        }

        self.set_lifecycle(Lifecycle::CleaningUp);

        let mut chords: Vec<ChordDescriptor> = record.keys().cloned().collect();
        chords.sort();
        for chord in chords {
            match self.backend.unregister(&chord).await {
                Ok(()) => report.unregistered.push(chord),
                Err(e) => {
                    warn!(chord = %chord, error = %e, "failed to unregister during cleanup");
                    report.failed.push((chord, e));
                }
            }
        }

        record.clear();
        self.set_lifecycle(Lifecycle::Uninitialized);

        if report.is_clean() {
            info!(count = report.unregistered.len(), "hotkeys cleaned up");
        } else {
            warn!(
                unregistered = report.unregistered.len(),
                failed = report.failed.len(),
                "hotkeys cleaned up with failures"
            );
        }
        report
    }

    async fn register_locked(
        &self,
        record: &mut RegistrationRecord,
        binding: &Binding,
    ) -> Result<(), BindingError> {
        match record.get(&binding.key) {
            Some(holder) if holder == &binding.id => {
                debug!(id = %binding.id, chord = %binding.key, "already registered");
                return Ok(());
            }
            Some(holder) => {
                warn!(
                    id = %binding.id,
                    chord = %binding.key,
                    evicted = %holder,
                    "chord already registered, evicting"
                );
                if let Err(e) = self.unregister_locked(record, &binding.key).await {
                    warn!(chord = %binding.key, error = %e, "eviction failed, registering anyway");
                }
            }
            None => {}
        }

        let callback = self.callback_for(&binding.id);
        if let Err(source) = self.backend.register(&binding.key, callback).await {
            error!(
                id = %binding.id,
                chord = %binding.key,
                error = %source,
                "failed to register hotkey"
            );
            return Err(BindingError::Registration {
                op: RegistrationOp::Register,
                chord: binding.key.clone(),
                source,
            });
        }

        // The new chord is live; only now release the one this id held before
        if let Some(stale) = chord_for_id(record, &binding.id) {
            if let Err(e) = self.unregister_locked(record, &stale).await {
                warn!(id = %binding.id, chord = %binding.key, "rolling back new chord");
                if let Err(rollback) = self.backend.unregister(&binding.key).await {
                    error!(
                        id = %binding.id,
                        chord = %binding.key,
                        error = %rollback,
                        "rollback failed, binding holds two chords"
                    );
                    record.insert(binding.key.clone(), binding.id.clone());
                }
                return Err(e);
            }
        }

        record.insert(binding.key.clone(), binding.id.clone());
        debug!(id = %binding.id, chord = %binding.key, "hotkey registered");
        Ok(())
    }

    async fn unregister_locked(
        &self,
        record: &mut RegistrationRecord,
        chord: &ChordDescriptor,
    ) -> Result<(), BindingError> {
        if !record.contains_key(chord) {
            return Ok(());
        }

        if let Err(source) = self.backend.unregister(chord).await {
            error!(chord = %chord, error = %source, "failed to unregister hotkey");
            return Err(BindingError::Registration {
                op: RegistrationOp::Unregister,
                chord: chord.clone(),
                source,
            });
        }

        if let Some(id) = record.remove(chord) {
            debug!(id = %id, chord = %chord, "hotkey unregistered");
        }
        Ok(())
    }

    /// OS callback that resolves handlers by id when it fires
    fn callback_for(&self, id: &str) -> ChordCallback {
        let dispatcher = Arc::downgrade(&self.dispatcher);
        let id = id.to_owned();
        Arc::new(move |state| {
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.dispatch(&id, state);
            }
        })
    }

    fn ensure_not_cleaning_up(&self) -> Result<(), BindingError> {
        match self.lifecycle() {
            Lifecycle::CleaningUp => Err(BindingError::Busy(Lifecycle::CleaningUp)),
            _ => Ok(()),
        }
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        let previous = self.lifecycle.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "registry lifecycle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::KeyState;
    use crate::dispatcher::{action, DispatchOutcome, HandlerPair};
    use crate::input::hotkey::MockHotkeyBackend;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// In-memory OS primitive with failure injection
    #[derive(Default)]
    struct FakeBackend {
        active: SyncMutex<HashMap<ChordDescriptor, ChordCallback>>,
        refuse_register: SyncMutex<HashSet<String>>,
        refuse_unregister: SyncMutex<HashSet<String>>,
        register_calls: AtomicUsize,
        unregister_gate: Option<Semaphore>,
    }

    impl FakeBackend {
        fn gated() -> Self {
            Self {
                unregister_gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn open_gate(&self) {
            if let Some(gate) = &self.unregister_gate {
                gate.add_permits(1024);
            }
        }

        fn refuse_register(&self, chord: &str) {
            self.refuse_register.lock().insert(chord.to_owned());
        }

        fn refuse_unregister(&self, chord: &str) {
            self.refuse_unregister.lock().insert(chord.to_owned());
        }

        fn active(&self) -> Vec<String> {
            let mut chords: Vec<String> = self
                .active
                .lock()
                .keys()
                .map(|c| c.as_str().to_owned())
                .collect();
            chords.sort();
            chords
        }

        fn fire(&self, chord: &str, state: KeyState) -> bool {
            let callback = self.active.lock().get(&ChordDescriptor::new(chord)).cloned();
            callback.map(|cb| cb(state)).is_some()
        }
    }

    #[async_trait]
    impl HotkeyBackend for FakeBackend {
        async fn register(&self, chord: &ChordDescriptor, callback: ChordCallback) -> Result<()> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse_register.lock().contains(chord.as_str()) {
                bail!("{chord} is owned by another process");
            }
            let mut active = self.active.lock();
            if active.contains_key(chord) {
                bail!("{chord} is already registered");
            }
            active.insert(chord.clone(), callback);
            Ok(())
        }

        async fn unregister(&self, chord: &ChordDescriptor) -> Result<()> {
            if let Some(gate) = &self.unregister_gate {
                let _permit = gate.acquire().await?;
            }
            if self.refuse_unregister.lock().contains(chord.as_str()) {
                bail!("invalid handle for {chord}");
            }
            self.active.lock().remove(chord);
            Ok(())
        }
    }

    fn binding(id: &str, chord: &str) -> Binding {
        Binding::new(id, id, "", ChordDescriptor::new(chord))
    }

    fn pair() -> BindingSet {
        [binding("rec", "ctrl+shift+alt+r"), binding("vis", "ctrl+shift+alt+d")]
            .into_iter()
            .collect()
    }

    fn setup() -> (Arc<FakeBackend>, Arc<ActionDispatcher>, ChordRegistry) {
        let backend = Arc::new(FakeBackend::default());
        let dispatcher = Arc::new(ActionDispatcher::new());
        let registry = ChordRegistry::new(backend.clone(), dispatcher.clone());
        (backend, dispatcher, registry)
    }

    fn record(entries: &[(&str, &str)]) -> BTreeMap<ChordDescriptor, String> {
        entries
            .iter()
            .map(|(chord, id)| (ChordDescriptor::new(chord), (*id).to_owned()))
            .collect()
    }

    #[tokio::test]
    async fn test_register_records_chord() {
        let (backend, _, registry) = setup();
        registry.register(&binding("rec", "ctrl+r")).await.unwrap();

        assert_eq!(registry.registrations().await, record(&[("ctrl+r", "rec")]));
        assert_eq!(backend.active(), vec!["ctrl+r"]);
    }

    #[tokio::test]
    async fn test_register_same_chord_other_id_evicts() {
        let (backend, _, registry) = setup();
        registry.register(&binding("rec", "ctrl+r")).await.unwrap();
        registry.register(&binding("vis", "ctrl+r")).await.unwrap();

        assert_eq!(registry.registrations().await, record(&[("ctrl+r", "vis")]));
        assert_eq!(backend.active(), vec!["ctrl+r"]);
    }

    #[tokio::test]
    async fn test_register_same_binding_twice_is_noop() {
        let (backend, _, registry) = setup();
        registry.register(&binding("rec", "ctrl+r")).await.unwrap();
        registry.register(&binding("rec", "ctrl+r")).await.unwrap();

        assert_eq!(backend.register_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_register_new_chord_for_id_releases_old() {
        let (backend, _, registry) = setup();
        registry.register(&binding("rec", "ctrl+r")).await.unwrap();
        registry.register(&binding("rec", "ctrl+t")).await.unwrap();

        assert_eq!(registry.registrations().await, record(&[("ctrl+t", "rec")]));
        assert_eq!(backend.active(), vec!["ctrl+t"]);
    }

    #[tokio::test]
    async fn test_register_failure_leaves_record_unchanged() {
        let mut backend = MockHotkeyBackend::new();
        backend
            .expect_register()
            .returning(|_, _| Err(anyhow::anyhow!("unsupported key combination")));
        let registry = ChordRegistry::new(Arc::new(backend), Arc::new(ActionDispatcher::new()));

        let err = registry
            .register(&binding("rec", "ctrl+r"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BindingError::Registration {
                op: RegistrationOp::Register,
                ..
            }
        ));
        assert!(registry.registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_refused_keeps_previous_chord() {
        let (backend, _, registry) = setup();
        registry.register(&binding("rec", "ctrl+r")).await.unwrap();
        backend.refuse_register("ctrl+t");

        let err = registry
            .register(&binding("rec", "ctrl+t"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BindingError::Registration {
                op: RegistrationOp::Register,
                ..
            }
        ));
        assert_eq!(registry.registrations().await, record(&[("ctrl+r", "rec")]));
        assert_eq!(backend.active(), vec!["ctrl+r"]);
        assert!(backend.fire("ctrl+r", KeyState::Pressed));
    }

    #[tokio::test]
    async fn test_register_rolls_back_when_old_chord_cannot_be_released() {
        let (backend, _, registry) = setup();
        registry.register(&binding("rec", "ctrl+r")).await.unwrap();
        backend.refuse_unregister("ctrl+r");

        let err = registry
            .register(&binding("rec", "ctrl+t"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BindingError::Registration {
                op: RegistrationOp::Unregister,
                ..
            }
        ));
        assert_eq!(registry.registrations().await, record(&[("ctrl+r", "rec")]));
        assert_eq!(backend.active(), vec!["ctrl+r"]);
    }

    #[tokio::test]
    async fn test_unregister_untracked_is_noop() {
        let mut backend = MockHotkeyBackend::new();
        backend.expect_unregister().never();
        let registry = ChordRegistry::new(Arc::new(backend), Arc::new(ActionDispatcher::new()));

        registry
            .unregister(&ChordDescriptor::new("ctrl+q"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unregister_failure_keeps_record() {
        let (backend, _, registry) = setup();
        registry.register(&binding("rec", "ctrl+r")).await.unwrap();
        backend.refuse_unregister("ctrl+r");

        let err = registry
            .unregister(&ChordDescriptor::new("ctrl+r"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BindingError::Registration {
                op: RegistrationOp::Unregister,
                ..
            }
        ));
        assert_eq!(registry.registrations().await, record(&[("ctrl+r", "rec")]));
    }

    #[tokio::test]
    async fn test_init_registers_all_and_becomes_ready() {
        let (backend, _, registry) = setup();
        registry.init(&pair()).await.unwrap();

        assert!(registry.is_initialized());
        assert_eq!(
            registry.registrations().await,
            record(&[("ctrl+shift+alt+d", "vis"), ("ctrl+shift+alt+r", "rec")])
        );
        assert_eq!(backend.active().len(), 2);
    }

    #[tokio::test]
    async fn test_init_twice_equals_cleanup_then_init() {
        let (backend_a, _, twice) = setup();
        twice.init(&pair()).await.unwrap();
        twice.init(&pair()).await.unwrap();

        let (backend_b, _, once) = setup();
        once.cleanup().await;
        once.init(&pair()).await.unwrap();

        assert_eq!(twice.registrations().await, once.registrations().await);
        assert_eq!(backend_a.active(), backend_b.active());
        assert_eq!(twice.lifecycle(), Lifecycle::Ready);
    }

    #[tokio::test]
    async fn test_init_partial_failure_keeps_earlier_registrations() {
        let (backend, _, registry) = setup();
        // Id order: "rec" registers before "vis"
        backend.refuse_register("ctrl+shift+alt+d");

        let err = registry.init(&pair()).await.unwrap_err();

        assert!(matches!(err, BindingError::Registration { .. }));
        assert_eq!(registry.lifecycle(), Lifecycle::Uninitialized);
        assert_eq!(
            registry.registrations().await,
            record(&[("ctrl+shift+alt+r", "rec")])
        );

        // Cleanup still releases the partial state
        let report = registry.cleanup().await;
        assert_eq!(report.unregistered.len(), 1);
        assert!(backend.active().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_when_uninitialized_is_noop() {
        let mut backend = MockHotkeyBackend::new();
        backend.expect_unregister().never();
        let registry = ChordRegistry::new(Arc::new(backend), Arc::new(ActionDispatcher::new()));

        let report = registry.cleanup().await;
        let again = registry.cleanup().await;

        assert!(report.unregistered.is_empty() && report.is_clean());
        assert!(again.unregistered.is_empty() && again.is_clean());
        assert_eq!(registry.lifecycle(), Lifecycle::Uninitialized);
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_failures() {
        let (backend, _, registry) = setup();
        registry.init(&pair()).await.unwrap();
        backend.refuse_unregister("ctrl+shift+alt+d");

        let report = registry.cleanup().await;

        assert_eq!(report.unregistered, vec![ChordDescriptor::new("ctrl+shift+alt+r")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.as_str(), "ctrl+shift+alt+d");
        assert_eq!(registry.lifecycle(), Lifecycle::Uninitialized);
        assert!(registry.registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_during_cleanup_is_busy() {
        let backend = Arc::new(FakeBackend::gated());
        let registry = Arc::new(ChordRegistry::new(
            backend.clone(),
            Arc::new(ActionDispatcher::new()),
        ));
        registry.init(&pair()).await.unwrap();

        let cleanup = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.cleanup().await }
        });

        let mut lifecycle = registry.subscribe_lifecycle();
        tokio::time::timeout(
            Duration::from_secs(1),
            lifecycle.wait_for(|state| *state == Lifecycle::CleaningUp),
        )
        .await
        .unwrap()
        .unwrap();

        let err = registry
            .register(&binding("other", "ctrl+o"))
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::Busy(Lifecycle::CleaningUp)));

        backend.open_gate();
        let report = cleanup.await.unwrap();
        assert!(report.is_clean());
        assert!(backend.active().is_empty());
    }

    #[tokio::test]
    async fn test_update_conflict_changes_nothing() {
        let (backend, _, registry) = setup();
        registry.init(&pair()).await.unwrap();
        let before = registry.registrations().await;

        let err = registry
            .update_binding(&binding("rec", "ctrl+shift+alt+r"), &ChordDescriptor::new("ctrl+shift+alt+d"))
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            BindingError::Conflict { existing_id, .. } if existing_id == "vis"
        ));
        assert_eq!(registry.registrations().await, before);
        assert_eq!(backend.register_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_update_moves_chord() {
        let (backend, _, registry) = setup();
        registry.init(&pair()).await.unwrap();

        registry
            .update_binding(&binding("rec", "ctrl+shift+alt+r"), &ChordDescriptor::new("ctrl+alt+x"))
            .await
            .unwrap();

        assert_eq!(
            registry.registrations().await,
            record(&[("ctrl+alt+x", "rec"), ("ctrl+shift+alt+d", "vis")])
        );
        assert_eq!(backend.active(), vec!["ctrl+alt+x", "ctrl+shift+alt+d"]);
    }

    #[tokio::test]
    async fn test_update_failure_restores_old_chord() {
        let (backend, _, registry) = setup();
        registry.init(&pair()).await.unwrap();
        backend.refuse_register("ctrl+alt+x");

        let err = registry
            .update_binding(&binding("rec", "ctrl+shift+alt+r"), &ChordDescriptor::new("ctrl+alt+x"))
            .await
            .unwrap_err();

        assert!(matches!(err, BindingError::Registration { .. }));
        assert_eq!(
            registry.registrations().await,
            record(&[("ctrl+shift+alt+d", "vis"), ("ctrl+shift+alt+r", "rec")])
        );
        assert!(backend.active().contains(&"ctrl+shift+alt+r".to_owned()));
    }

    #[tokio::test]
    async fn test_callback_resolves_current_handler() {
        let (backend, dispatcher, registry) = setup();
        registry.init(&pair()).await.unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let counter = |c: &Arc<AtomicUsize>| {
            let c = Arc::clone(c);
            action(move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        dispatcher.set_handlers("rec", HandlerPair::pressed(counter(&first)));
        assert!(backend.fire("ctrl+shift+alt+r", KeyState::Pressed));

        // Swap without re-registering
        dispatcher.set_handlers("rec", HandlerPair::pressed(counter(&second)));
        assert!(backend.fire("ctrl+shift+alt+r", KeyState::Pressed));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(backend.register_calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.on_pressed("vis"), DispatchOutcome::NoHandler);
    }
}

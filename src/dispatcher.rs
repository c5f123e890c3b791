use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::bindings::KeyState;

/// Application action bound to a chord transition
///
/// Runs on the OS callback thread, so it must return quickly. Long work goes
/// through [`spawn_action`].
pub type Action = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as an [`Action`]
pub fn action<F>(f: F) -> Action
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Action that runs async work on `runtime` without waiting for it
///
/// Failures of the spawned work are logged under `label`.
pub fn spawn_action<F, Fut>(runtime: Handle, label: &'static str, factory: F) -> Action
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || {
        let fut = factory();
        runtime.spawn(async move {
            if let Err(e) = fut.await {
                error!(action = label, error = ?e, "background action failed");
            }
        });
        Ok(())
    })
}

/// Press/release handlers for one binding
#[derive(Clone, Default)]
pub struct HandlerPair {
    /// Invoked on [`KeyState::Pressed`]
    pub on_pressed: Option<Action>,
    /// Invoked on [`KeyState::Released`]
    pub on_released: Option<Action>,
}

impl HandlerPair {
    /// Only a press handler
    #[must_use]
    pub fn pressed(action: Action) -> Self {
        Self {
            on_pressed: Some(action),
            on_released: None,
        }
    }

    /// Press and release handlers
    #[must_use]
    pub fn pressed_released(on_pressed: Action, on_released: Action) -> Self {
        Self {
            on_pressed: Some(on_pressed),
            on_released: Some(on_released),
        }
    }

    fn for_state(&self, state: KeyState) -> Option<&Action> {
        match state {
            KeyState::Pressed => self.on_pressed.as_ref(),
            KeyState::Released => self.on_released.as_ref(),
        }
    }
}

impl std::fmt::Debug for HandlerPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerPair")
            .field("on_pressed", &self.on_pressed.is_some())
            .field("on_released", &self.on_released.is_some())
            .finish()
    }
}

/// Result of routing one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Action ran and returned `Ok`
    Handled,
    /// No handler for this id and state
    NoHandler,
    /// Action returned `Err` or panicked; already logged
    Failed,
}

/// Indirection table from binding id to its current handlers
///
/// Handlers are looked up when a transition arrives, so swapping them never
/// requires touching the OS registration.
#[derive(Default)]
pub struct ActionDispatcher {
    handlers: RwLock<HashMap<String, HandlerPair>>,
}

impl ActionDispatcher {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace handlers for `id`
    pub fn set_handlers(&self, id: &str, handlers: HandlerPair) {
        debug!(id = id, handlers = ?handlers, "handlers installed");
        self.handlers.write().insert(id.to_owned(), handlers);
    }

    /// Drop handlers for `id`; returns what was installed
    pub fn remove_handlers(&self, id: &str) -> Option<HandlerPair> {
        self.handlers.write().remove(id)
    }

    /// Whether any handler is installed for `id`
    #[must_use]
    pub fn has_handlers(&self, id: &str) -> bool {
        self.handlers.read().contains_key(id)
    }

    /// Route a press for `id`
    pub fn on_pressed(&self, id: &str) -> DispatchOutcome {
        self.dispatch(id, KeyState::Pressed)
    }

    /// Route a release for `id`
    pub fn on_released(&self, id: &str) -> DispatchOutcome {
        self.dispatch(id, KeyState::Released)
    }

    /// Route a transition for `id` to its current handler
    ///
    /// Never panics and never returns an error: action failures stop here.
    pub fn dispatch(&self, id: &str, state: KeyState) -> DispatchOutcome {
        // Clone out so the table lock is not held while the action runs
        let action = self
            .handlers
            .read()
            .get(id)
            .and_then(|pair| pair.for_state(state))
            .cloned();

        let Some(action) = action else {
            debug!(id = id, state = ?state, "no handler");
            return DispatchOutcome::NoHandler;
        };

        match catch_unwind(AssertUnwindSafe(|| action())) {
            Ok(Ok(())) => {
                debug!(id = id, state = ?state, "action handled");
                DispatchOutcome::Handled
            }
            Ok(Err(e)) => {
                warn!(id = id, state = ?state, error = ?e, "action failed");
                DispatchOutcome::Failed
            }
            Err(_) => {
                error!(id = id, state = ?state, "action panicked");
                DispatchOutcome::Failed
            }
        }
    }
}

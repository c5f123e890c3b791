use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::bindings::{TOGGLE_RECORDING, TOGGLE_VISIBILITY};
use crate::dispatcher::{action, ActionDispatcher, HandlerPair};

/// Audio capture boundary (enables testing via mocking)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Begin capturing audio
    ///
    /// # Errors
    /// Returns error if no input device is available or capture fails to start
    async fn start_record(&self) -> Result<()>;

    /// Stop capturing audio
    ///
    /// # Errors
    /// Returns error if the capture backend fails to stop
    async fn stop_record(&self) -> Result<()>;
}

/// Main window boundary (enables testing via mocking)
#[cfg_attr(test, mockall::automock)]
pub trait WindowControl: Send + Sync {
    /// Show the window if hidden, hide it otherwise
    ///
    /// # Errors
    /// Returns error if the window cannot be found
    fn toggle_visibility(&self) -> Result<()>;
}

/// Push-to-talk state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Waiting for a press
    Idle,
    /// Chord held, capture requested
    Recording,
    /// Chord released, stop requested
    Stopping,
}

enum RecorderCommand {
    Start,
    Stop,
}

/// Drives a [`Recorder`] from chord press/release
///
/// Transitions happen synchronously on the calling (OS callback) thread; the
/// recorder calls run in order on a background task.
pub struct RecordingController {
    state: Arc<watch::Sender<RecordingState>>,
    commands: mpsc::UnboundedSender<RecorderCommand>,
}

impl RecordingController {
    /// Start the recorder worker on `runtime`
    pub fn spawn(recorder: Arc<dyn Recorder>, runtime: &Handle) -> Self {
        let (state, _) = watch::channel(RecordingState::Idle);
        let state = Arc::new(state);
        let (commands, command_rx) = mpsc::unbounded_channel();
        runtime.spawn(run_worker(recorder, Arc::clone(&state), command_rx));
        Self { state, commands }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> RecordingState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RecordingState> {
        self.state.subscribe()
    }

    /// Handle chord press
    ///
    /// # Errors
    /// Returns error if the recorder worker has stopped
    pub fn on_press(&self) -> Result<()> {
        let started = self.state.send_if_modified(|state| match *state {
            RecordingState::Idle => {
                info!("hotkey pressed: Idle → Recording");
                *state = RecordingState::Recording;
                true
            }
            RecordingState::Recording => {
                debug!("hotkey pressed while recording (ignored)");
                false
            }
            RecordingState::Stopping => {
                debug!("hotkey pressed while stopping (ignored)");
                false
            }
        });

        if started {
            self.send(RecorderCommand::Start)?;
        }
        Ok(())
    }

    /// Handle chord release
    ///
    /// # Errors
    /// Returns error if the recorder worker has stopped
    pub fn on_release(&self) -> Result<()> {
        let stopping = self.state.send_if_modified(|state| match *state {
            RecordingState::Recording => {
                info!("hotkey released: Recording → Stopping");
                *state = RecordingState::Stopping;
                true
            }
            RecordingState::Idle => {
                debug!("hotkey released while idle (ignored)");
                false
            }
            RecordingState::Stopping => {
                debug!("hotkey released while stopping (ignored)");
                false
            }
        });

        if stopping {
            self.send(RecorderCommand::Stop)?;
        }
        Ok(())
    }

    fn send(&self, command: RecorderCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| {
            self.state.send_replace(RecordingState::Idle);
            anyhow!("recorder worker is not running")
        })
    }
}

async fn run_worker(
    recorder: Arc<dyn Recorder>,
    state: Arc<watch::Sender<RecordingState>>,
    mut commands: mpsc::UnboundedReceiver<RecorderCommand>,
) {
    let mut capturing = false;
    while let Some(command) = commands.recv().await {
        match command {
            RecorderCommand::Start => match recorder.start_record().await {
                Ok(()) => capturing = true,
                Err(e) => {
                    error!(error = ?e, "failed to start recording");
                    state.send_if_modified(|state| {
                        if *state == RecordingState::Recording {
                            info!("recording failed: Recording → Idle");
                            *state = RecordingState::Idle;
                            true
                        } else {
                            false
                        }
                    });
                }
            },
            RecorderCommand::Stop => {
                if capturing {
                    if let Err(e) = recorder.stop_record().await {
                        error!(error = ?e, "failed to stop recording");
                    }
                    capturing = false;
                }
                state.send_replace(RecordingState::Idle);
                info!("recording stopped: Stopping → Idle");
            }
        }
    }
    debug!("recorder worker stopped");
}

/// Wire the compiled-in bindings to their actions
///
/// `toggleRecording` is push-to-talk (press starts, release stops);
/// `toggleVisibility` toggles the window on press.
pub fn install_default_handlers(
    dispatcher: &ActionDispatcher,
    recording: Arc<RecordingController>,
    window: Arc<dyn WindowControl>,
) {
    let on_press = Arc::clone(&recording);
    dispatcher.set_handlers(
        TOGGLE_RECORDING,
        HandlerPair::pressed_released(
            action(move || on_press.on_press()),
            action(move || recording.on_release()),
        ),
    );
    dispatcher.set_handlers(
        TOGGLE_VISIBILITY,
        HandlerPair::pressed(action(move || window.toggle_visibility())),
    );
}

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use global_hotkey::{hotkey::HotKey, GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::bindings::{ChordDescriptor, KeyState};

/// Poll interval of the owner thread (10ms to avoid busy-waiting)
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Callback invoked on the OS callback thread for each chord transition
pub type ChordCallback = Arc<dyn Fn(KeyState) + Send + Sync>;

/// OS global-hotkey primitive (enables testing via mocking)
///
/// Chords are opaque strings to callers; the backend decides how to parse them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HotkeyBackend: Send + Sync {
    /// Register `chord`; `callback` fires on every press and release
    ///
    /// # Errors
    /// Returns error if the chord is invalid or the OS refuses it
    async fn register(&self, chord: &ChordDescriptor, callback: ChordCallback) -> Result<()>;

    /// Drop the registration for `chord`
    ///
    /// # Errors
    /// Returns error if the OS refuses the call
    async fn unregister(&self, chord: &ChordDescriptor) -> Result<()>;
}

/// Parse a chord into a `global-hotkey` [`HotKey`]
///
/// # Errors
/// Returns error if a token is not a known modifier or key
pub fn parse_chord(chord: &ChordDescriptor) -> Result<HotKey> {
    chord
        .as_str()
        .parse::<HotKey>()
        .map_err(|e| anyhow!("invalid chord {chord}: {e}"))
}

const fn key_state(state: HotKeyState) -> KeyState {
    match state {
        HotKeyState::Pressed => KeyState::Pressed,
        HotKeyState::Released => KeyState::Released,
    }
}

enum Command {
    Register {
        chord: ChordDescriptor,
        callback: ChordCallback,
        reply: oneshot::Sender<Result<()>>,
    },
    Unregister {
        chord: ChordDescriptor,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// [`HotkeyBackend`] on top of the `global-hotkey` crate
///
/// A dedicated owner thread holds the [`GlobalHotKeyManager`], applies
/// register/unregister commands and routes [`GlobalHotKeyEvent`]s to callbacks.
pub struct GlobalHotkeyBackend {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl GlobalHotkeyBackend {
    /// Start the owner thread and create the hotkey manager on it
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned or the manager cannot be created
    pub fn spawn() -> Result<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = std::thread::Builder::new()
            .name("hotkey-owner".to_owned())
            .spawn(move || {
                let manager = match GlobalHotKeyManager::new() {
                    Ok(manager) => manager,
                    Err(e) => {
                        let _ = ready_tx.send(Err(anyhow!("failed to create hotkey manager: {e}")));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                Owner::new(manager, command_rx).run();
            })
            .context("failed to spawn hotkey owner thread")?;

        ready_rx
            .recv()
            .context("hotkey owner thread exited during startup")??;

        info!("global hotkey backend started");
        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| anyhow!("hotkey owner thread is gone"))?;
        response
            .await
            .context("hotkey owner thread dropped the request")?
    }
}

#[async_trait]
impl HotkeyBackend for GlobalHotkeyBackend {
    async fn register(&self, chord: &ChordDescriptor, callback: ChordCallback) -> Result<()> {
        let chord = chord.clone();
        self.request(|reply| Command::Register {
            chord,
            callback,
            reply,
        })
        .await
    }

    async fn unregister(&self, chord: &ChordDescriptor) -> Result<()> {
        let chord = chord.clone();
        self.request(|reply| Command::Unregister { chord, reply })
            .await
    }
}

impl Drop for GlobalHotkeyBackend {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("hotkey owner thread panicked");
            }
        }
    }
}

struct Registered {
    chord: ChordDescriptor,
    hotkey: HotKey,
    callback: ChordCallback,
}

/// State owned by the hotkey thread
struct Owner {
    manager: GlobalHotKeyManager,
    commands: Receiver<Command>,
    by_id: HashMap<u32, Registered>,
}

impl Owner {
    fn new(manager: GlobalHotKeyManager, commands: Receiver<Command>) -> Self {
        Self {
            manager,
            commands,
            by_id: HashMap::new(),
        }
    }

    fn run(mut self) {
        let events = GlobalHotKeyEvent::receiver();
        loop {
            loop {
                match self.commands.try_recv() {
                    Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => {
                        self.shutdown();
                        return;
                    }
                    Ok(command) => self.apply(command),
                    Err(TryRecvError::Empty) => break,
                }
            }

            while let Ok(event) = events.try_recv() {
                self.route(&event);
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register {
                chord,
                callback,
                reply,
            } => {
                let _ = reply.send(self.register(chord, callback));
            }
            Command::Unregister { chord, reply } => {
                let _ = reply.send(self.unregister(&chord));
            }
            Command::Shutdown => {}
        }
    }

    fn register(&mut self, chord: ChordDescriptor, callback: ChordCallback) -> Result<()> {
        let hotkey = parse_chord(&chord)?;
        if self.by_id.contains_key(&hotkey.id()) {
            bail!("chord {chord} is already registered");
        }

        self.manager
            .register(hotkey)
            .map_err(|e| anyhow!("failed to register hotkey {chord}: {e}"))?;

        debug!(chord = %chord, id = hotkey.id(), "hotkey registered");
        self.by_id.insert(
            hotkey.id(),
            Registered {
                chord,
                hotkey,
                callback,
            },
        );
        Ok(())
    }

    fn unregister(&mut self, chord: &ChordDescriptor) -> Result<()> {
        let hotkey = parse_chord(chord)?;
        self.manager
            .unregister(hotkey)
            .map_err(|e| anyhow!("failed to unregister hotkey {chord}: {e}"))?;
        self.by_id.remove(&hotkey.id());
        debug!(chord = %chord, "hotkey unregistered");
        Ok(())
    }

    fn route(&self, event: &GlobalHotKeyEvent) {
        let Some(registered) = self.by_id.get(&event.id) else {
            return;
        };
        let state = key_state(event.state);
        debug!(chord = %registered.chord, state = ?state, "hotkey event");
        (registered.callback)(state);
    }

    fn shutdown(&mut self) {
        for (_, registered) in self.by_id.drain() {
            if let Err(e) = self.manager.unregister(registered.hotkey) {
                warn!("failed to unregister hotkey {}: {}", registered.chord, e);
            }
        }
        info!("global hotkey backend stopped");
    }
}

//! Hotkey Bindings - global hotkey subsystem for a voice-recording desktop app
//!
//! Detects key chords, keeps them registered with the OS, routes press/release
//! to application actions, and persists user-customized bindings.

/// Application actions behind the default bindings
pub mod actions;
/// Binding types, defaults and persistence
pub mod bindings;
/// Configuration management
pub mod config;
/// Façade used by the UI layer
pub mod coordinator;
/// Press/release routing to actions
pub mod dispatcher;
/// Error taxonomy
pub mod error;
/// Input handling (OS hotkeys, chord detection)
pub mod input;
/// OS chord registrations
pub mod registry;
/// Logging setup
pub mod telemetry;

pub use bindings::{Binding, BindingSet, ChordDescriptor, KeyState};
pub use coordinator::{BindingCoordinator, BindingsView};
pub use dispatcher::ActionDispatcher;
pub use error::BindingError;
pub use registry::{ChordRegistry, Lifecycle};

/// Chord preview from held-key snapshots
pub mod detector;
/// OS global-hotkey primitive
pub mod hotkey;

pub use detector::{ChordDetector, ChordPreview, KeySnapshot};
pub use hotkey::{ChordCallback, GlobalHotkeyBackend, HotkeyBackend};

use super::{Binding, BindingSet, ChordDescriptor};

/// Push-to-talk recording binding id
pub const TOGGLE_RECORDING: &str = "toggleRecording";
/// Main window show/hide binding id
pub const TOGGLE_VISIBILITY: &str = "toggleVisibility";

/// Compiled-in bindings; these define the universe of valid ids
#[must_use]
pub fn default_bindings() -> BindingSet {
    [
        Binding::new(
            TOGGLE_RECORDING,
            "Toggle recording",
            "Starts voice recording while held, stops on release",
            ChordDescriptor::new("commandorcontrol+shift+alt+r"),
        ),
        Binding::new(
            TOGGLE_VISIBILITY,
            "Toggle visibility",
            "Shows or hides the main application window",
            ChordDescriptor::new("commandorcontrol+shift+alt+d"),
        ),
    ]
    .into_iter()
    .collect()
}

use std::collections::BTreeSet;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::bindings::ChordDescriptor;

/// Snapshots longer than this are treated as rollover noise
pub const MAX_CHORD_LEN: usize = 4;

/// Keys held at one instant, as reported by the host input layer
pub type KeySnapshot = BTreeSet<String>;

/// Live detector output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChordPreview {
    /// Keys accumulated since the chord started, in first-seen order
    pub keys: Vec<String>,
    /// True while any key is held
    pub is_pressing: bool,
    /// Largest chord reached before the most recent full release
    pub completed: Option<ChordDescriptor>,
}

/// Infers the chord being pressed from a stream of held-key snapshots
///
/// Purely for UI feedback (e.g. while the user records a new binding); it has
/// no effect on what the OS triggers.
pub struct ChordDetector {
    last_pressed: Vec<String>,
    is_pressing: bool,
    completed: Option<ChordDescriptor>,
    max_len: usize,
    preview: watch::Sender<ChordPreview>,
}

impl Default for ChordDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChordDetector {
    /// Detector with the default cap of [`MAX_CHORD_LEN`] keys
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_len(MAX_CHORD_LEN)
    }

    /// Detector ignoring snapshots with more than `max_len` keys
    #[must_use]
    pub fn with_max_len(max_len: usize) -> Self {
        let (preview, _) = watch::channel(ChordPreview::default());
        Self {
            last_pressed: Vec::new(),
            is_pressing: false,
            completed: None,
            max_len,
            preview,
        }
    }

    /// Read-only handle on the live preview
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChordPreview> {
        self.preview.subscribe()
    }

    /// Accumulated keys
    #[must_use]
    pub fn last_pressed_keys(&self) -> &[String] {
        &self.last_pressed
    }

    /// Whether any key is currently held
    #[must_use]
    pub const fn is_pressing(&self) -> bool {
        self.is_pressing
    }

    /// Chord completed by the last full release
    #[must_use]
    pub const fn completed(&self) -> Option<&ChordDescriptor> {
        self.completed.as_ref()
    }

    /// Fold one snapshot into the accumulator
    ///
    /// Returns `false` if the snapshot was ignored for exceeding the cap.
    pub fn process_snapshot(&mut self, snapshot: &KeySnapshot) -> bool {
        let current_len = snapshot.len();
        if current_len > self.max_len {
            trace!(len = current_len, max = self.max_len, "snapshot over cap ignored");
            return false;
        }

        if current_len == 0 {
            // Full release: remember the chord, restart the accumulator
            if !self.last_pressed.is_empty() {
                let chord = ChordDescriptor::from_keys(&self.last_pressed);
                debug!(chord = %chord, "chord completed");
                self.completed = Some(chord);
            }
            self.last_pressed.clear();
            self.is_pressing = false;
            self.publish();
            return true;
        }

        if !self.is_pressing {
            self.last_pressed.clear();
        }
        self.is_pressing = true;

        // A partial release must not shrink the displayed chord
        if current_len >= self.last_pressed.len() {
            for key in snapshot {
                if !self.last_pressed.contains(key) {
                    self.last_pressed.push(key.clone());
                }
            }
        }

        self.publish();
        true
    }

    /// Consume snapshots until the sender side closes
    pub async fn run(mut self, mut snapshots: mpsc::Receiver<KeySnapshot>) {
        debug!("chord detector running");
        while let Some(snapshot) = snapshots.recv().await {
            self.process_snapshot(&snapshot);
        }
        debug!("chord detector stopped (input closed)");
    }

    fn publish(&self) {
        self.preview.send_replace(ChordPreview {
            keys: self.last_pressed.clone(),
            is_pressing: self.is_pressing,
            completed: self.completed.clone(),
        });
    }
}

/// Parse a whitespace- or `+`-separated list of held keys into a snapshot
#[must_use]
pub fn snapshot_from_line(line: &str) -> KeySnapshot {
    line.split(|c: char| c.is_whitespace() || c == '+')
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

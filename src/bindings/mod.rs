/// Compiled-in default bindings
pub mod defaults;
/// File-backed key-value store
pub mod file_store;
/// In-process key-value store
pub mod memory;
/// Binding persistence
pub mod store;

pub use defaults::{default_bindings, TOGGLE_RECORDING, TOGGLE_VISIBILITY};
pub use file_store::JsonFileStore;
pub use memory::MemoryStore;
pub use store::{BindingStore, KeyValueStore};

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Token separator inside a chord descriptor
pub const CHORD_SEPARATOR: char = '+';

/// Press/release transition reported by the OS primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    /// Chord went down
    Pressed,
    /// Chord went up
    Released,
}

/// Canonical chord string handed to the OS primitive (e.g. `ctrl+shift+r`)
///
/// Tokens are trimmed, lowercased and platform aliases are rewritten. Modifiers
/// come first in a fixed order (`ctrl`, `command`/`super`, `shift`, `alt`),
/// followed by the remaining keys sorted, so `shift+ctrl+r` and `ctrl+shift+r`
/// are the same chord.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChordDescriptor(String);

impl<'de> Deserialize<'de> for ChordDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|raw| Self::new(&raw))
    }
}

impl ChordDescriptor {
    /// Normalize a raw chord string
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let mut tokens: Vec<String> = raw
            .split(CHORD_SEPARATOR)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(normalize_token)
            .collect();
        tokens.sort_by(|a, b| {
            modifier_rank(a)
                .cmp(&modifier_rank(b))
                .then_with(|| a.cmp(b))
        });
        tokens.dedup();
        Self(tokens.join("+"))
    }

    /// Build a descriptor from already-normalized key tokens
    #[must_use]
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> Self {
        let joined = keys.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("+");
        Self::new(&joined)
    }

    /// Canonical string form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Individual key tokens
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(CHORD_SEPARATOR)
    }

    /// True if normalization left no tokens
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ChordDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChordDescriptor {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Name of the platform's super modifier
const fn super_key() -> &'static str {
    if cfg!(target_os = "macos") {
        "command"
    } else {
        "super"
    }
}

/// Rewrite aliases for a single token; the OS treats each group as one modifier
fn normalize_token(token: &str) -> String {
    let lower = token.to_lowercase();
    match lower.as_str() {
        "commandorcontrol" | "cmdorctrl" | "cmdorcontrol" | "commandorctrl" => {
            if cfg!(target_os = "macos") {
                "command".to_owned()
            } else {
                "ctrl".to_owned()
            }
        }
        "control" => "ctrl".to_owned(),
        "option" => "alt".to_owned(),
        "command" | "cmd" | "super" | "meta" => super_key().to_owned(),
        _ => lower,
    }
}

/// Position of a token in canonical order; ordinary keys sort after modifiers
fn modifier_rank(token: &str) -> u8 {
    match token {
        "ctrl" => 0,
        "command" | "super" => 1,
        "shift" => 2,
        "alt" => 3,
        _ => u8::MAX,
    }
}

/// A user-facing hotkey binding
///
/// Press/release handlers are not part of the binding; they live in the
/// [`ActionDispatcher`](crate::dispatcher::ActionDispatcher) table keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Display description
    pub description: String,
    /// Bound chord
    pub key: ChordDescriptor,
}

impl Binding {
    /// Create a binding
    #[must_use]
    pub fn new(id: &str, name: &str, description: &str, key: ChordDescriptor) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            key,
        }
    }

    /// Same binding with a different chord
    #[must_use]
    pub fn with_key(&self, key: ChordDescriptor) -> Self {
        Self {
            key,
            ..self.clone()
        }
    }
}

/// All bindings keyed by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSet {
    entries: BTreeMap<String, Binding>,
}

impl BindingSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a binding under its id
    pub fn insert(&mut self, binding: Binding) -> Option<Binding> {
        self.entries.insert(binding.id.clone(), binding)
    }

    /// Look up by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Binding> {
        self.entries.get(id)
    }

    /// Mutable lookup by id
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Binding> {
        self.entries.get_mut(id)
    }

    /// Id of the binding holding `chord`, if any
    #[must_use]
    pub fn id_for_chord(&self, chord: &ChordDescriptor) -> Option<&str> {
        self.entries
            .values()
            .find(|binding| &binding.key == chord)
            .map(|binding| binding.id.as_str())
    }

    /// Bindings in id order
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.entries.values()
    }

    /// Number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no bindings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `id -> chord` pairs, the persisted projection
    #[must_use]
    pub fn keys_by_id(&self) -> BTreeMap<String, ChordDescriptor> {
        self.entries
            .iter()
            .map(|(id, binding)| (id.clone(), binding.key.clone()))
            .collect()
    }
}

impl FromIterator<Binding> for BindingSet {
    fn from_iter<I: IntoIterator<Item = Binding>>(iter: I) -> Self {
        let mut set = Self::new();
        for binding in iter {
            set.insert(binding);
        }
        set
    }
}

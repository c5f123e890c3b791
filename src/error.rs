use std::fmt;
use thiserror::Error;

use crate::bindings::ChordDescriptor;
use crate::registry::Lifecycle;

/// Which OS primitive call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOp {
    /// `register` was refused
    Register,
    /// `unregister` was refused
    Unregister,
}

impl fmt::Display for RegistrationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register => f.write_str("register"),
            Self::Unregister => f.write_str("unregister"),
        }
    }
}

/// Errors surfaced by the binding registry and coordinator
#[derive(Debug, Error)]
pub enum BindingError {
    /// Chord is already bound to another binding
    #[error("chord {chord} is already bound to {existing_id}")]
    Conflict {
        /// Requested chord
        chord: ChordDescriptor,
        /// Binding currently holding it
        existing_id: String,
    },

    /// Unknown binding id
    #[error("no binding with id {0}")]
    NotFound(String),

    /// OS hotkey primitive refused the call
    #[error("failed to {op} chord {chord}")]
    Registration {
        /// Failed operation
        op: RegistrationOp,
        /// Chord involved
        chord: ChordDescriptor,
        /// Platform error
        source: anyhow::Error,
    },

    /// Init or cleanup in flight; retry shortly
    #[error("hotkey registry is busy ({0})")]
    Busy(Lifecycle),

    /// Persisting bindings failed
    #[error("failed to persist bindings")]
    Storage(#[source] anyhow::Error),
}

impl BindingError {
    /// Whether the caller may retry (or offer the user a choice) without a code change
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Busy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_both_sides() {
        let err = BindingError::Conflict {
            chord: ChordDescriptor::new("ctrl+alt+x"),
            existing_id: "toggleVisibility".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "chord ctrl+alt+x is already bound to toggleVisibility"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_registration_error_keeps_source() {
        use std::error::Error as _;

        let err = BindingError::Registration {
            op: RegistrationOp::Unregister,
            chord: ChordDescriptor::new("ctrl+r"),
            source: anyhow::anyhow!("handle not found"),
        };
        assert_eq!(err.to_string(), "failed to unregister chord ctrl+r");
        assert!(err.source().is_some());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_busy_reports_lifecycle() {
        let err = BindingError::Busy(Lifecycle::CleaningUp);
        assert_eq!(err.to_string(), "hotkey registry is busy (cleaning up)");
    }
}

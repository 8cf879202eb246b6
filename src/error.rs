//! Error types for dropsim.
//!
//! All errors are strongly typed using thiserror. Soft failures never surface
//! here: they are absorbed by the component that hit them and only show up in
//! logs and step counters. What reaches the caller is one of the variants below.

use serde::Serialize;
use thiserror::Error;

use crate::handle::Handle;
use crate::host::HostError;

/// Validation errors for settings and requested parameters.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid frame range: start ({start}) must be before end ({end})")]
    InvalidFrameRange {
        start: i32,
        end: i32,
    },

    #[error("Parameter '{field}' value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Axis index {index} is out of range (expected 0, 1 or 2)")]
    InvalidAxis {
        index: usize,
    },

    #[error("Unknown cloth preset '{name}'")]
    UnknownPreset {
        name: String,
    },

    #[error("Invalid settings: {reason}")]
    InvalidSettings {
        reason: String,
    },
}

/// Coarse classification of a [`DropError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// No scene, no selection, or nothing usable to work on.
    ContextUnavailable,
    /// A tracked handle died and was essential to the current step.
    InvalidReference,
    /// A parameter was unusable as given.
    ValidationFailure,
    /// The host reported an error for a boundary call.
    ExternalOperationFailure,
    /// An internal invariant was violated.
    StateInconsistency,
    /// The command is not available in the current phase.
    Rejected,
}

/// Top-level error type for dropsim commands.
#[derive(Debug, Error)]
pub enum DropError {
    #[error("Context unavailable: {reason}")]
    ContextUnavailable {
        reason: String,
    },

    #[error("Invalid reference {handle} ({context})")]
    InvalidReference {
        handle: Handle,
        context: &'static str,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("External operation '{op}' failed: {source}")]
    ExternalOperation {
        op: &'static str,
        #[source]
        source: HostError,
    },

    #[error("State inconsistency: {reason}")]
    StateInconsistency {
        reason: String,
    },

    #[error("Command '{command}' rejected: {reason}")]
    Rejected {
        command: &'static str,
        reason: String,
    },
}

impl DropError {
    /// Creates a context-unavailable error.
    #[must_use]
    pub fn context(reason: impl Into<String>) -> Self {
        Self::ContextUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a state-inconsistency error.
    #[must_use]
    pub fn inconsistent(reason: impl Into<String>) -> Self {
        Self::StateInconsistency {
            reason: reason.into(),
        }
    }

    /// Creates a rejected-command error.
    #[must_use]
    pub fn rejected(command: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            command,
            reason: reason.into(),
        }
    }

    /// Wraps a host error raised by the named boundary call.
    ///
    /// `HostError::Missing` becomes `InvalidReference` so callers can tell a dead
    /// handle from a genuine host failure.
    #[must_use]
    pub fn host(op: &'static str, source: HostError) -> Self {
        match source {
            HostError::Missing(handle) => Self::InvalidReference {
                handle,
                context: op,
            },
            HostError::ContextUnavailable(reason) => Self::ContextUnavailable { reason },
            other => Self::ExternalOperation { op, source: other },
        }
    }

    /// Returns the taxonomy bucket for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ContextUnavailable { .. } => ErrorKind::ContextUnavailable,
            Self::InvalidReference { .. } => ErrorKind::InvalidReference,
            Self::Validation(_) => ErrorKind::ValidationFailure,
            Self::ExternalOperation { .. } => ErrorKind::ExternalOperationFailure,
            Self::StateInconsistency { .. } => ErrorKind::StateInconsistency,
            Self::Rejected { .. } => ErrorKind::Rejected,
        }
    }

    /// Returns true if the registry must be wiped after this error.
    #[must_use]
    pub const fn requires_reset(&self) -> bool {
        matches!(self, Self::StateInconsistency { .. })
    }

    /// Returns true if the error aborts the step that raised it.
    ///
    /// Validation failures are clamped and logged instead.
    #[must_use]
    pub const fn is_hard(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }

    /// Returns true if this error was raised before any state was touched.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::ContextUnavailable { .. }
        )
    }
}

/// Result type alias for dropsim operations.
pub type DropResult<T> = Result<T, DropError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleKind;

    #[test]
    fn test_validation_error_frame_range() {
        let err = ValidationError::InvalidFrameRange { start: 10, end: 5 };
        let msg = format!("{err}");
        assert!(msg.contains("Invalid frame range"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_validation_error_out_of_range() {
        let err = ValidationError::OutOfRange {
            field: "friction",
            value: 250.0,
            min: 0.0,
            max: 100.0,
        };
        let msg = format!("{err}");
        assert!(msg.contains("friction"));
        assert!(msg.contains("250"));
    }

    #[test]
    fn test_host_missing_maps_to_invalid_reference() {
        let handle = Handle::new(HandleKind::Object, 4, 2);
        let err = DropError::host("delete", HostError::Missing(handle));
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
        assert!(err.to_string().contains("object#4v2"));
    }

    #[test]
    fn test_host_rejection_maps_to_external_failure() {
        let err = DropError::host(
            "join",
            HostError::Rejected {
                op: "join",
                reason: "nothing selected".to_string(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::ExternalOperationFailure);
        assert!(!err.requires_reset());
    }

    #[test]
    fn test_inconsistency_requires_reset() {
        let err = DropError::inconsistent("passive handle tracked as active");
        assert_eq!(err.kind(), ErrorKind::StateInconsistency);
        assert!(err.requires_reset());
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_validation_from() {
        let err: DropError = ValidationError::InvalidAxis { index: 5 }.into();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        assert!(!err.is_hard());
        assert!(DropError::context("no scene").is_hard());
    }

    #[test]
    fn test_rejected_is_precondition() {
        let err = DropError::rejected("apply", "no session is running");
        assert!(err.is_precondition());
        assert!(err.to_string().contains("apply"));
    }
}

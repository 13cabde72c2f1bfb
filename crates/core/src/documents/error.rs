//! Document-level error types.

use tally_shared::AppError;
use thiserror::Error;

/// Errors raised by entity methods and pre-save invariant checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// Status transition not allowed by the entity's state machine.
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        /// Entity kind.
        entity: &'static str,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Referenced line does not exist on the document.
    #[error("Line {line_number} not found")]
    LineNotFound {
        /// Requested line number.
        line_number: u32,
    },

    /// Input rejected before any state change.
    #[error("{0}")]
    Validation(String),

    /// Derived state disagrees with stored state.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

impl DocumentError {
    /// Builds an `InvalidTransition` from two displayable statuses.
    pub fn transition(
        entity: &'static str,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidTransition { .. } => 422,
            Self::Validation(_) => 400,
            Self::LineNotFound { .. } | Self::InvariantViolation(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::LineNotFound { .. } => "LINE_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::InvalidTransition { .. } => Self::InvalidTransition(err.to_string()),
            DocumentError::Validation(msg) => Self::Validation(msg),
            DocumentError::LineNotFound { .. } | DocumentError::InvariantViolation(_) => {
                Self::Consistency(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message_names_both_states() {
        let err = DocumentError::transition("invoice", "paid", "cancelled");
        assert_eq!(err.to_string(), "Invalid invoice transition from paid to cancelled");
        assert_eq!(err.status_code(), 422);
        assert!(matches!(AppError::from(err), AppError::InvalidTransition(_)));
    }

    #[test]
    fn test_invariant_maps_to_consistency() {
        let err = DocumentError::InvariantViolation("totals".into());
        assert_eq!(err.error_code(), "INVARIANT_VIOLATION");
        assert!(matches!(AppError::from(err), AppError::Consistency(_)));
    }
}

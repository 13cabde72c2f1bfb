//! Accrual manager error types.

use tally_shared::AppError;
use thiserror::Error;

use crate::documents::{AccrualPeriod, DocumentError};
use crate::ports::StoreError;
use crate::workflow::ApprovalError;

/// Errors raised by the accrual manager.
#[derive(Debug, Error)]
pub enum AccrualError {
    /// Repository failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Entity method or invariant failure.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Approval chain refused the action.
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    /// An accrual for the agreement and period already exists.
    #[error("Accrual {existing} already covers agreement {agreement} for {period}")]
    AlreadyExists {
        /// Agreement number.
        agreement: String,
        /// Accrual period.
        period: AccrualPeriod,
        /// Existing accrual number.
        existing: String,
    },

    /// The agreement's parameters cannot produce an amount.
    #[error("Invalid spend agreement configuration: {0}")]
    Configuration(String),

    /// Input rejected before any state change.
    #[error("{0}")]
    Validation(String),
}

impl AccrualError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Store(err) => err.status_code(),
            Self::Document(err) => err.status_code(),
            Self::Approval(err) => err.status_code(),
            Self::AlreadyExists { .. } => 409,
            Self::Configuration(_) | Self::Validation(_) => 400,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.error_code(),
            Self::Document(err) => err.error_code(),
            Self::Approval(err) => err.error_code(),
            Self::AlreadyExists { .. } => "ACCRUAL_EXISTS",
            Self::Configuration(_) => "INVALID_CONFIGURATION",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

impl From<AccrualError> for AppError {
    fn from(err: AccrualError) -> Self {
        match err {
            AccrualError::Store(err) => err.into(),
            AccrualError::Document(err) => err.into(),
            AccrualError::Approval(err) => Self::Forbidden(err.to_string()),
            AccrualError::AlreadyExists { .. } => Self::Conflict(err.to_string()),
            AccrualError::Configuration(_) | AccrualError::Validation(_) => Self::Validation(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_message() {
        let err = AccrualError::AlreadyExists {
            agreement: "TS-7".into(),
            period: AccrualPeriod::new(2026, 3).unwrap(),
            existing: "ACR-1".into(),
        };
        assert_eq!(err.to_string(), "Accrual ACR-1 already covers agreement TS-7 for 2026-03");
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_configuration_is_validation() {
        let err = AccrualError::Configuration("Tiers 1 and 2 overlap".into());
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
        assert!(matches!(AppError::from(err), AppError::Validation(_)));
    }
}

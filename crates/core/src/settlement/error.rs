//! Settlement engine error types.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tally_shared::AppError;
use thiserror::Error;

use crate::documents::DocumentError;
use crate::ports::{GatewayError, StoreError};
use crate::workflow::ApprovalError;

/// Errors raised by the settlement engine.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Repository failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Entity method or invariant failure.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Approval chain refused the action.
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    /// The general ledger refused the posting.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Nothing in the window qualifies for settlement.
    #[error("No settleable documents between {start} and {end}")]
    NoItems {
        /// Window start.
        start: NaiveDate,
        /// Window end.
        end: NaiveDate,
    },

    /// Posting debits and credits differ.
    #[error("GL posting is unbalanced: debits ({debits}) != credits ({credits})")]
    UnbalancedPosting {
        /// Total debits.
        debits: Decimal,
        /// Total credits.
        credits: Decimal,
    },

    /// A posting line is malformed.
    #[error("Invalid GL posting: {0}")]
    InvalidPosting(String),

    /// The settlement was already handed to the ledger.
    #[error("Settlement {settlement} is already posted to the ledger")]
    AlreadyPosted {
        /// Settlement number.
        settlement: String,
    },

    /// Bank amount is outside tolerance of the net settlement.
    #[error("Bank amount {actual} differs from net settlement {expected} by {variance} (tolerance {tolerance})")]
    BankMismatch {
        /// Net settlement.
        expected: Decimal,
        /// Bank statement amount.
        actual: Decimal,
        /// `actual - expected`.
        variance: Decimal,
        /// Allowed absolute variance.
        tolerance: Decimal,
    },

    /// Input rejected before any state change.
    #[error("{0}")]
    Validation(String),
}

impl SettlementError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Store(err) => err.status_code(),
            Self::Document(err) => err.status_code(),
            Self::Approval(err) => err.status_code(),
            Self::Gateway(_) => 502,
            Self::NoItems { .. } | Self::BankMismatch { .. } | Self::Validation(_) => 400,
            Self::AlreadyPosted { .. } => 409,
            Self::UnbalancedPosting { .. } | Self::InvalidPosting(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.error_code(),
            Self::Document(err) => err.error_code(),
            Self::Approval(err) => err.error_code(),
            Self::Gateway(_) => "GL_GATEWAY_ERROR",
            Self::NoItems { .. } => "NO_SETTLEABLE_ITEMS",
            Self::UnbalancedPosting { .. } => "UNBALANCED_POSTING",
            Self::InvalidPosting(_) => "INVALID_POSTING",
            Self::AlreadyPosted { .. } => "ALREADY_POSTED",
            Self::BankMismatch { .. } => "BANK_MISMATCH",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Store(err) => err.into(),
            SettlementError::Document(err) => err.into(),
            SettlementError::Approval(_) => Self::Forbidden(err.to_string()),
            SettlementError::Gateway(_) => Self::ExternalService(err.to_string()),
            SettlementError::UnbalancedPosting { .. } | SettlementError::InvalidPosting(_) => {
                Self::Consistency(err.to_string())
            }
            SettlementError::AlreadyPosted { .. } => Self::Conflict(err.to_string()),
            SettlementError::NoItems { .. }
            | SettlementError::BankMismatch { .. }
            | SettlementError::Validation(_) => Self::Validation(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unbalanced_posting_is_a_consistency_error() {
        let err = SettlementError::UnbalancedPosting {
            debits: dec!(100),
            credits: dec!(90),
        };
        assert_eq!(err.status_code(), 500);
        assert!(matches!(AppError::from(err), AppError::Consistency(_)));
    }

    #[test]
    fn test_bank_mismatch_message_carries_variance() {
        let err = SettlementError::BankMismatch {
            expected: dec!(1000),
            actual: dec!(950),
            variance: dec!(-50),
            tolerance: dec!(10),
        };
        assert_eq!(
            err.to_string(),
            "Bank amount 950 differs from net settlement 1000 by -50 (tolerance 10)"
        );
        assert_eq!(err.error_code(), "BANK_MISMATCH");
    }

    #[test]
    fn test_gateway_maps_to_external_service() {
        let err = SettlementError::from(GatewayError("ledger offline".into()));
        assert_eq!(err.status_code(), 502);
        assert!(matches!(AppError::from(err), AppError::ExternalService(_)));
    }
}

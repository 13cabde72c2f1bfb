//! Matching engine error types.

use tally_shared::AppError;
use tally_shared::types::Currency;
use thiserror::Error;

use crate::documents::DocumentError;
use crate::ports::StoreError;

/// Errors raised by the matching engine.
///
/// Tolerance breaches are not errors: they are reported as
/// [`MatchException`](super::MatchException)s on the match result.
#[derive(Debug, Error)]
pub enum MatchingError {
    /// Repository failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Entity method or invariant failure.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The two documents belong to different customers.
    #[error("{left} and {right} belong to different customers")]
    CustomerMismatch {
        /// First document number.
        left: String,
        /// Second document number.
        right: String,
    },

    /// The two documents are in different currencies.
    #[error("{left} is in {left_currency} but {right} is in {right_currency}")]
    CurrencyMismatch {
        /// First document number.
        left: String,
        /// First document currency.
        left_currency: Currency,
        /// Second document number.
        right: String,
        /// Second document currency.
        right_currency: Currency,
    },

    /// The invoice is already matched to another purchase order.
    #[error("Invoice {invoice} is already matched to purchase order {purchase_order}")]
    AlreadyMatched {
        /// Invoice number.
        invoice: String,
        /// Purchase order the invoice is matched to.
        purchase_order: String,
    },

    /// Input rejected before any state change.
    #[error("{0}")]
    Validation(String),
}

impl MatchingError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Store(err) => err.status_code(),
            Self::Document(err) => err.status_code(),
            Self::CustomerMismatch { .. } | Self::CurrencyMismatch { .. } | Self::Validation(_) => 400,
            Self::AlreadyMatched { .. } => 409,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.error_code(),
            Self::Document(err) => err.error_code(),
            Self::CustomerMismatch { .. } => "CUSTOMER_MISMATCH",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::AlreadyMatched { .. } => "ALREADY_MATCHED",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

impl From<MatchingError> for AppError {
    fn from(err: MatchingError) -> Self {
        match err {
            MatchingError::Store(err) => err.into(),
            MatchingError::Document(err) => err.into(),
            MatchingError::AlreadyMatched { .. } => Self::Conflict(err.to_string()),
            MatchingError::CustomerMismatch { .. }
            | MatchingError::CurrencyMismatch { .. }
            | MatchingError::Validation(_) => Self::Validation(err.to_string()),
        }
    }
}

//! Report error types.

use chrono::NaiveDate;
use tally_shared::AppError;
use thiserror::Error;

use crate::ports::StoreError;

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Loading documents failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid date range.
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange {
        /// Start date.
        start: NaiveDate,
        /// End date.
        end: NaiveDate,
    },
}

impl ReportError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Store(err) => err.status_code(),
            Self::InvalidDateRange { .. } => 400,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.error_code(),
            Self::InvalidDateRange { .. } => "INVALID_DATE_RANGE",
        }
    }
}

impl From<ReportError> for AppError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Store(err) => err.into(),
            ReportError::InvalidDateRange { .. } => Self::Validation(err.to_string()),
        }
    }
}

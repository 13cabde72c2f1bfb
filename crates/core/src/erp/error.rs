//! ERP mapping error types.

use tally_shared::AppError;
use thiserror::Error;

/// Errors raised while translating an ERP document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// The ERP system name is not recognized.
    #[error("Unsupported ERP system: {0}")]
    UnsupportedSystem(String),

    /// A required field is absent or null.
    #[error("Missing required field {field}")]
    MissingField {
        /// Field path as configured for the ERP system.
        field: String,
    },

    /// A field is present but cannot be parsed.
    #[error("Field {field} has invalid {expected} value {value:?}")]
    InvalidValue {
        /// Field path.
        field: String,
        /// Raw value.
        value: String,
        /// Expected kind (decimal, date, currency, ...).
        expected: &'static str,
    },

    /// The customer lookup did not recognize the code.
    #[error("Unknown customer code {0}")]
    UnknownCustomer(String),

    /// The product lookup did not recognize the code.
    #[error("Unknown product code {0}")]
    UnknownProduct(String),

    /// The document has no lines.
    #[error("Document {0} has no lines")]
    NoLines(String),
}

impl MappingError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownCustomer(_) | Self::UnknownProduct(_) => 422,
            _ => 400,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedSystem(_) => "UNSUPPORTED_ERP_SYSTEM",
            Self::MissingField { .. } => "MISSING_FIELD",
            Self::InvalidValue { .. } => "INVALID_FIELD_VALUE",
            Self::UnknownCustomer(_) => "UNKNOWN_CUSTOMER",
            Self::UnknownProduct(_) => "UNKNOWN_PRODUCT",
            Self::NoLines(_) => "NO_LINES",
        }
    }

    pub(crate) fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, value: impl Into<String>, expected: &'static str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.into(),
            expected,
        }
    }
}

impl From<MappingError> for AppError {
    fn from(err: MappingError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_message() {
        let err = MappingError::invalid("/BLDAT", "2026-13-01", "date");
        assert_eq!(err.to_string(), "Field /BLDAT has invalid date value \"2026-13-01\"");
        assert_eq!(err.error_code(), "INVALID_FIELD_VALUE");
        assert!(matches!(AppError::from(err), AppError::Validation(_)));
    }

    #[test]
    fn test_unknown_codes_are_unprocessable() {
        assert_eq!(MappingError::UnknownCustomer("C-9".into()).status_code(), 422);
        assert_eq!(MappingError::missing("/KUNNR").status_code(), 400);
    }
}

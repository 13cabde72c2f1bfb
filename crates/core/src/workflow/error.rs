//! Approval workflow error types.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur while walking an approval chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    /// Approval requested before a chain was started.
    #[error("No approval chain has been started")]
    NoChain,

    /// Every step of the chain is already approved.
    #[error("Approval chain is already complete")]
    ChainComplete,

    /// The same user tried to approve two steps of one chain.
    #[error("User has already approved a step of this chain")]
    DuplicateApprover,

    /// Actor's role is below the step's required role.
    #[error("User role {user_role} does not meet required role {required_role}")]
    InsufficientRole {
        /// The actor's role.
        user_role: String,
        /// The role the step requires.
        required_role: String,
    },

    /// Amount exceeds the actor's approval limit.
    #[error("Amount {amount} exceeds user approval limit {limit}")]
    ExceedsApprovalLimit {
        /// Document amount.
        amount: Decimal,
        /// Actor's limit.
        limit: Decimal,
    },

    /// A configured rule names an unknown role.
    #[error("Approval rule {rule} requires unknown role {role}")]
    UnknownRole {
        /// Rule name.
        rule: String,
        /// Role as configured.
        role: String,
    },

    /// Rejection reason is required but not provided.
    #[error("Rejection reason is required")]
    RejectionReasonRequired,
}

impl ApprovalError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoChain | Self::ChainComplete | Self::RejectionReasonRequired => 400,
            Self::DuplicateApprover
            | Self::InsufficientRole { .. }
            | Self::ExceedsApprovalLimit { .. } => 403,
            Self::UnknownRole { .. } => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoChain => "NO_APPROVAL_CHAIN",
            Self::ChainComplete => "APPROVAL_CHAIN_COMPLETE",
            Self::DuplicateApprover => "DUPLICATE_APPROVER",
            Self::InsufficientRole { .. } => "INSUFFICIENT_ROLE",
            Self::ExceedsApprovalLimit { .. } => "EXCEEDS_APPROVAL_LIMIT",
            Self::UnknownRole { .. } => "UNKNOWN_ROLE",
            Self::RejectionReasonRequired => "REJECTION_REASON_REQUIRED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_role_error() {
        let err = ApprovalError::InsufficientRole {
            user_role: "submitter".to_string(),
            required_role: "approver".to_string(),
        };
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.error_code(), "INSUFFICIENT_ROLE");
        assert!(err.to_string().contains("approver"));
    }

    #[test]
    fn test_exceeds_limit_error() {
        let err = ApprovalError::ExceedsApprovalLimit {
            amount: Decimal::new(10000, 2),
            limit: Decimal::new(5000, 2),
        };
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.error_code(), "EXCEEDS_APPROVAL_LIMIT");
    }

    #[test]
    fn test_rejection_reason_required_error() {
        let err = ApprovalError::RejectionReasonRequired;
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "REJECTION_REASON_REQUIRED");
    }
}

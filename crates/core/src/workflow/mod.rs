//! Approval workflow shared by settlements and accruals.
//!
//! # Modules
//!
//! - `approval` - Roles, rules, the approval policy and embedded chain state
//! - `error` - Approval-specific error types

pub mod approval;
pub mod error;

#[cfg(test)]
mod approval_props;

pub use approval::{
    Actor, ApprovalAction, ApprovalDecision, ApprovalPolicy, ApprovalRule, ApprovalState,
    ApprovalStep, RuleBasedApprovalPolicy, UserRole,
};
pub use error::ApprovalError;

//! Matching engine: purchase order to invoice to payment.
//!
//! Invoices are scored line by line against purchase orders with
//! configurable price, quantity, amount and date tolerances. Payments are
//! applied to invoices explicitly or allocated automatically, oldest due
//! date first.

pub mod error;
pub mod scoring;
pub mod service;
pub mod types;

#[cfg(test)]
mod scoring_props;

pub use error::MatchingError;
pub use scoring::{evaluate_match, line_confidence, variance_ratio};
pub use service::MatchingEngine;
pub use types::{
    AllocationOutcome, AutoMatchReport, InvoiceAllocationOutcome, LineMatch, MatchException,
    MatchResult, PaymentMatch, ThreeWayMatch,
};

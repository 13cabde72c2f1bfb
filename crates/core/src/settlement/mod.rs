//! Settlement and netting.
//!
//! A settlement snapshots a customer's invoices, payments and deductions
//! for a period, nets them, settles each source document and produces a
//! balanced GL journal.
//!
//! # Modules
//!
//! - `error` - Settlement-specific error types
//! - `posting` - GL journal construction and balance validation
//! - `service` - The settlement engine

pub mod error;
pub mod posting;
pub mod service;

#[cfg(test)]
mod posting_props;

pub use error::SettlementError;
pub use posting::{GlLine, GlPosting, build_posting, validate_lines};
pub use service::SettlementEngine;

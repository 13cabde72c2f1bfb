//! Accrual and variance management.
//!
//! Accruals are calculated from spend agreements, approved into the
//! books, compared against the period's invoiced actuals and closed once
//! the variance is inside tolerance. Reversal books a sign-flipped mirror.

pub mod calculation;
pub mod error;
pub mod service;

#[cfg(test)]
mod calculation_props;

pub use calculation::{agreement_lines, calculate_amount, distribute_evenly};
pub use error::AccrualError;
pub use service::AccrualManager;

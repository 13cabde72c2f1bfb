//! Reconciliation reports.
//!
//! Read-only aggregations over stored documents:
//! - Accrual variance per period
//! - Match exceptions per customer
//! - Settlement summary per date range

pub mod error;
pub mod service;
pub mod types;


pub use error::ReportError;
pub use service::ReportService;
pub use types::*;

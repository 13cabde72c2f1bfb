//! Core reconciliation logic for Tally.
//!
//! This crate contains the business logic with ZERO web or database
//! dependencies. Persistence and the general ledger are reached through the
//! ports in [`ports`]; `tally-db` implements them.
//!
//! # Modules
//!
//! - `documents` - Purchase orders, invoices, payments, deductions, settlements, accruals
//! - `matching` - PO to invoice line matching and payment application
//! - `accrual` - Accrual calculation, actuals, variance and period close
//! - `settlement` - Netting, approval, processing and GL posting
//! - `workflow` - Approval chains
//! - `erp` - SAP, Oracle and generic document import
//! - `reports` - Read-only reconciliation reports
//! - `currency` - Base-currency conversion
//! - `batch` - Per-item batch outcome reports

pub mod accrual;
pub mod batch;
pub mod currency;
pub mod documents;
pub mod erp;
pub mod matching;
pub mod ports;
pub mod reports;
pub mod settlement;
pub mod workflow;

#[cfg(test)]
mod test_support;

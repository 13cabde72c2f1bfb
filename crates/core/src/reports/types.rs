//! Report data types.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{AccrualId, CustomerId, InvoiceId, SettlementId};

use crate::documents::AccrualPeriod;

/// Accrual against actual totals for one currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarianceTotals {
    /// Sum of accrued amounts.
    pub total_accrual: Decimal,
    /// Sum of actual amounts.
    pub total_actual: Decimal,
    /// `total_actual - total_accrual`.
    pub total_variance: Decimal,
    /// Variance as a percentage of the accrued total.
    pub variance_percent: Decimal,
}

/// An accrual flagged for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewItem {
    /// Accrual ID.
    pub accrual_id: AccrualId,
    /// Accrual number.
    pub number: String,
    /// Customer.
    pub customer_id: CustomerId,
    /// Currency code.
    pub currency: String,
    /// Accrued amount.
    pub accrual: Decimal,
    /// Actual amount.
    pub actual: Decimal,
    /// Actual minus accrued.
    pub variance: Decimal,
    /// Variance percent.
    pub variance_percent: Decimal,
}

/// Accrual variance for one period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualVarianceReport {
    /// Report type identifier.
    pub report_type: String,
    /// Reported period.
    pub period: AccrualPeriod,
    /// Accruals per status, reversal entries included.
    pub status_counts: BTreeMap<String, u64>,
    /// Totals per currency, reversed originals and reversal entries excluded.
    pub totals: BTreeMap<String, VarianceTotals>,
    /// Accruals needing review, largest variance first.
    pub review: Vec<ReviewItem>,
}

/// An invoice that is not fully matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchException {
    /// Invoice ID.
    pub invoice_id: InvoiceId,
    /// Invoice number.
    pub number: String,
    /// Match status.
    pub match_status: String,
    /// Invoice date.
    pub invoice_date: NaiveDate,
    /// Invoice total.
    pub total: Decimal,
    /// Total of lines without a match.
    pub unmatched_amount: Decimal,
}

/// Match exceptions for one customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchExceptionReport {
    /// Report type identifier.
    pub report_type: String,
    /// Customer.
    pub customer_id: CustomerId,
    /// Billed invoices per match status.
    pub invoice_match_counts: BTreeMap<String, u64>,
    /// Payments per match status.
    pub payment_match_counts: BTreeMap<String, u64>,
    /// Unmatched invoice line amounts per currency.
    pub unmatched_invoice_amount: BTreeMap<String, Decimal>,
    /// Unapplied payment amounts per currency.
    pub unapplied_payment_amount: BTreeMap<String, Decimal>,
    /// Invoices not fully matched, oldest first.
    pub exceptions: Vec<MatchException>,
}

/// A failed settlement and its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSettlement {
    /// Settlement ID.
    pub settlement_id: SettlementId,
    /// Settlement number.
    pub number: String,
    /// Recorded failure reason.
    pub reason: Option<String>,
}

/// Settlement activity in a date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSummaryReport {
    /// Report type identifier.
    pub report_type: String,
    /// Range start, inclusive.
    pub from: NaiveDate,
    /// Range end, inclusive.
    pub to: NaiveDate,
    /// Settlements per status.
    pub status_counts: BTreeMap<String, u64>,
    /// Net of completed settlements per currency.
    pub completed_net: BTreeMap<String, Decimal>,
    /// Net of settlements still open per currency.
    pub open_net: BTreeMap<String, Decimal>,
    /// Completed settlements not yet posted to the ledger.
    pub awaiting_posting: u64,
    /// Failed settlements.
    pub failed: Vec<FailedSettlement>,
}

//! Matching result types.

use rust_decimal::Decimal;
use serde::Serialize;
use tally_shared::types::{Currency, InvoiceId, PaymentId, ProductId, PurchaseOrderId};

use crate::documents::{DocRef, PurchaseOrderStatus};

/// Header-level problem that prevents a match from being committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchException {
    /// Invoice and PO totals differ by more than the amount tolerance.
    AmountVariance {
        /// Invoice total.
        invoice_total: Decimal,
        /// Purchase order total.
        po_total: Decimal,
        /// `invoice_total - po_total`.
        difference: Decimal,
    },
    /// Invoice date is too far from the order date.
    DateOutsideWindow {
        /// Days between order and invoice.
        days: i64,
        /// Allowed window.
        window_days: i64,
    },
    /// Invoice and PO currencies differ.
    CurrencyMismatch {
        /// Invoice currency.
        invoice: Currency,
        /// Purchase order currency.
        purchase_order: Currency,
    },
    /// The purchase order does not accept invoices in its status.
    PurchaseOrderNotOpen {
        /// Purchase order status.
        status: PurchaseOrderStatus,
    },
    /// The invoice has no lines.
    NoLines,
}

/// An invoice line paired with a purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineMatch {
    /// Invoice line number.
    pub invoice_line: u32,
    /// Purchase order line number.
    pub po_line: u32,
    /// Matched product.
    pub product_id: ProductId,
    /// Quantity allocated against the PO line.
    pub quantity: Decimal,
    /// Invoiced amount for the allocated quantity.
    pub amount: Decimal,
    /// Relative unit price difference.
    pub price_variance: Decimal,
    /// Relative quantity difference.
    pub quantity_variance: Decimal,
    /// Line confidence, 0-100.
    pub confidence: Decimal,
}

/// Result of evaluating an invoice against a purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    /// Evaluated invoice.
    pub invoice: DocRef<InvoiceId>,
    /// Evaluated purchase order.
    pub purchase_order: DocRef<PurchaseOrderId>,
    /// Whether the match was (or would be) committed.
    pub matched: bool,
    /// Share of invoice lines matched, 0-100.
    pub confidence: Decimal,
    /// Header exceptions.
    pub exceptions: Vec<MatchException>,
    /// Line pairings found.
    pub line_matches: Vec<LineMatch>,
    /// Invoice lines without an acceptable candidate.
    pub unmatched_lines: Vec<u32>,
}

impl MatchResult {
    /// Returns true if the result is not committable but close enough to
    /// be worth a manual look.
    #[must_use]
    pub fn needs_review(&self, review_floor: Decimal) -> bool {
        !self.matched && self.confidence >= review_floor
    }
}

/// Result of applying a payment to an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentMatch {
    /// Applied payment.
    pub payment: DocRef<PaymentId>,
    /// Receiving invoice.
    pub invoice: DocRef<InvoiceId>,
    /// Amount applied by this call.
    pub amount_applied: Decimal,
    /// Payment balance left afterwards.
    pub payment_unapplied: Decimal,
    /// Invoice balance left afterwards.
    pub invoice_outstanding: Decimal,
}

/// Per-invoice outcome of an automatic payment allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AllocationOutcome {
    /// Amount applied.
    Applied {
        /// Applied amount.
        amount: Decimal,
    },
    /// Application failed; the loop moved on.
    Failed {
        /// Failure reason.
        reason: String,
    },
}

/// One invoice visited by an automatic allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceAllocationOutcome {
    /// Visited invoice.
    pub invoice: DocRef<InvoiceId>,
    /// What happened.
    #[serde(flatten)]
    pub outcome: AllocationOutcome,
}

/// Result of automatically allocating a payment across open invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoMatchReport {
    /// Allocated payment.
    pub payment: DocRef<PaymentId>,
    /// Total applied by this run.
    pub applied_total: Decimal,
    /// Payment balance left afterwards.
    pub unapplied_remaining: Decimal,
    /// Outcomes in allocation order.
    pub outcomes: Vec<InvoiceAllocationOutcome>,
}

/// Result of a PO, invoice and payment match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreeWayMatch {
    /// Invoice to purchase order step.
    pub invoice_match: MatchResult,
    /// Payment to invoice step; absent when the first step did not match.
    pub payment_match: Option<PaymentMatch>,
}

impl ThreeWayMatch {
    /// Returns true when both steps committed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.invoice_match.matched && self.payment_match.is_some()
    }
}

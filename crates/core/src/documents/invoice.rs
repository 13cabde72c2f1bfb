//! Customer invoices, their PO match state and payment receipts.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{
    Currency, CustomerId, InvoiceId, OrganizationId, PaymentId, ProductId, PurchaseOrderId,
    SpendAgreementId, VendorId,
};

use super::settlement::SettlementStamp;
use super::{
    DocRef, Document, DocumentError, DocumentKind, DocumentTotals, PricedLine, date_in_range,
    status_allowed,
};
use crate::currency::conversion::to_base_amount;

/// Invoice lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Being prepared.
    Draft,
    /// Waiting for approval.
    PendingApproval,
    /// Approved; becomes `PendingPayment` on the next save.
    Approved,
    /// Approved and awaiting payment.
    PendingPayment,
    /// Some payment received.
    PartiallyPaid,
    /// Fully paid.
    Paid,
    /// Past due date and not fully paid.
    Overdue,
    /// Disputed by the customer.
    Disputed,
    /// Cancelled.
    Cancelled,
}

impl InvoiceStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::PendingPayment => "pending_payment",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Disputed => "disputed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses whose value is derived from payments and due date.
    #[must_use]
    pub const fn is_post_approval(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::PendingPayment | Self::PartiallyPaid | Self::Paid | Self::Overdue
        )
    }

    /// Statuses that accept payment applications.
    #[must_use]
    pub const fn accepts_payment(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::PendingPayment | Self::PartiallyPaid | Self::Overdue
        )
    }

    /// Statuses included in settlement snapshots.
    pub const SETTLEABLE: [Self; 5] = [
        Self::Approved,
        Self::PendingPayment,
        Self::PartiallyPaid,
        Self::Paid,
        Self::Overdue,
    ];

    /// Statuses counted as actual spend for accruals.
    pub const BILLED: [Self; 6] = [
        Self::Approved,
        Self::PendingPayment,
        Self::PartiallyPaid,
        Self::Paid,
        Self::Overdue,
        Self::Disputed,
    ];
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PO match state of an invoice, derived from its lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// No line matched.
    #[default]
    Unmatched,
    /// Some lines matched.
    PartiallyMatched,
    /// All lines matched, invoice had no PO reference of its own.
    Matched,
    /// All lines matched against the PO the invoice referenced.
    #[serde(rename = "3way_matched")]
    ThreeWayMatched,
}

impl MatchStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::PartiallyMatched => "partially_matched",
            Self::Matched => "matched",
            Self::ThreeWayMatched => "3way_matched",
        }
    }

    /// Returns true for fully matched invoices.
    #[must_use]
    pub const fn is_matched(self) -> bool {
        matches!(self, Self::Matched | Self::ThreeWayMatched)
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// Line number, unique within the invoice.
    pub line_number: u32,
    /// Billed product.
    pub product_id: ProductId,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Billed quantity.
    pub quantity: Decimal,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Tax charged on the line.
    #[serde(default)]
    pub tax: Decimal,
    /// Discount granted on the line.
    #[serde(default)]
    pub discount: Decimal,
    /// Derived: `quantity * unit_price`.
    #[serde(default)]
    pub amount: Decimal,
    /// Whether the line is matched to a PO line.
    #[serde(default)]
    pub matched: bool,
    /// Amount covered by the match.
    #[serde(default)]
    pub matched_amount: Decimal,
    /// Matched PO line number.
    #[serde(default)]
    pub po_line_number: Option<u32>,
    /// Confidence of the line match (0-100).
    #[serde(default)]
    pub match_confidence: Option<Decimal>,
}

impl InvoiceLine {
    /// Creates an unmatched line.
    #[must_use]
    pub fn new(line_number: u32, product_id: ProductId, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            line_number,
            product_id,
            description: None,
            quantity,
            unit_price,
            tax: Decimal::ZERO,
            discount: Decimal::ZERO,
            amount: quantity * unit_price,
            matched: false,
            matched_amount: Decimal::ZERO,
            po_line_number: None,
            match_confidence: None,
        }
    }

    /// Clears the match fields.
    pub fn clear_match(&mut self) {
        self.matched = false;
        self.matched_amount = Decimal::ZERO;
        self.po_line_number = None;
        self.match_confidence = None;
    }
}

impl PricedLine for InvoiceLine {
    fn quantity(&self) -> Decimal {
        self.quantity
    }
    fn unit_price(&self) -> Decimal {
        self.unit_price
    }
    fn tax(&self) -> Decimal {
        self.tax
    }
    fn discount(&self) -> Decimal {
        self.discount
    }
}

/// Amount of one payment applied to an invoice.
///
/// Keyed by payment; the amount mirrors the payment's own application so
/// repeating an application converges instead of double counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    /// Paying payment.
    pub payment: DocRef<PaymentId>,
    /// Total applied by that payment.
    pub amount: Decimal,
    /// Date of the latest application.
    pub applied_date: NaiveDate,
}

/// A customer invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: InvoiceId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Invoice number.
    pub number: String,
    /// PO the invoice declared when it was issued.
    #[serde(default)]
    pub purchase_order: Option<DocRef<PurchaseOrderId>>,
    /// PO the matching engine matched the invoice to.
    #[serde(default)]
    pub matched_purchase_order: Option<DocRef<PurchaseOrderId>>,
    /// Spend agreement this invoice is billed under.
    #[serde(default)]
    pub spend_reference: Option<DocRef<SpendAgreementId>>,
    /// Billed customer.
    pub customer_id: CustomerId,
    /// Vendor, if tracked.
    #[serde(default)]
    pub vendor_id: Option<VendorId>,
    /// Invoice date.
    pub invoice_date: NaiveDate,
    /// Payment due date.
    pub due_date: NaiveDate,
    /// Invoice currency.
    pub currency: Currency,
    /// Rate to the organization's base currency.
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: Decimal,
    /// Lifecycle status.
    pub status: InvoiceStatus,
    /// Derived PO match status.
    #[serde(default)]
    pub match_status: MatchStatus,
    /// Invoice lines.
    pub lines: Vec<InvoiceLine>,
    /// Derived header totals.
    #[serde(default)]
    pub totals: DocumentTotals,
    /// Derived: total in base currency.
    #[serde(default)]
    pub total_base: Decimal,
    /// Payments applied to the invoice.
    #[serde(default)]
    pub receipts: Vec<PaymentReceipt>,
    /// Derived: sum of receipts.
    #[serde(default)]
    pub amount_paid: Decimal,
    /// Derived: `total - amount_paid`.
    #[serde(default)]
    pub outstanding_amount: Decimal,
    /// Reason recorded when disputed.
    #[serde(default)]
    pub dispute_reason: Option<String>,
    /// Settlement that consumed the invoice.
    #[serde(default)]
    pub settlement: Option<SettlementStamp>,
}

fn default_exchange_rate() -> Decimal {
    Decimal::ONE
}

impl Invoice {
    /// Creates a draft invoice.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        number: impl Into<String>,
        customer_id: CustomerId,
        invoice_date: NaiveDate,
        due_date: NaiveDate,
        currency: Currency,
        lines: Vec<InvoiceLine>,
    ) -> Self {
        let totals = DocumentTotals::from_lines(&lines);
        Self {
            id: InvoiceId::new(),
            organization_id,
            number: number.into(),
            purchase_order: None,
            matched_purchase_order: None,
            spend_reference: None,
            customer_id,
            vendor_id: None,
            invoice_date,
            due_date,
            currency,
            exchange_rate: Decimal::ONE,
            status: InvoiceStatus::Draft,
            match_status: MatchStatus::Unmatched,
            lines,
            totals,
            total_base: totals.total,
            receipts: Vec::new(),
            amount_paid: Decimal::ZERO,
            outstanding_amount: totals.total,
            dispute_reason: None,
            settlement: None,
        }
    }

    /// Returns a reference to this invoice.
    #[must_use]
    pub fn doc_ref(&self) -> DocRef<InvoiceId> {
        DocRef::new(self.id, self.number.clone())
    }

    /// Looks up a line by number for mutation.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::LineNotFound` if the line does not exist.
    pub fn line_mut(&mut self, line_number: u32) -> Result<&mut InvoiceLine, DocumentError> {
        self.lines
            .iter_mut()
            .find(|l| l.line_number == line_number)
            .ok_or(DocumentError::LineNotFound { line_number })
    }

    /// Amount received from one payment.
    #[must_use]
    pub fn receipt_from(&self, payment_id: PaymentId) -> Decimal {
        self.receipts
            .iter()
            .find(|r| r.payment.id == payment_id)
            .map_or(Decimal::ZERO, |r| r.amount)
    }

    /// Sets the amount received from a payment, replacing any previous value.
    ///
    /// A zero amount removes the receipt.
    pub fn upsert_receipt(&mut self, payment: DocRef<PaymentId>, amount: Decimal, applied_date: NaiveDate) {
        self.receipts.retain(|r| r.payment.id != payment.id);
        if !amount.is_zero() {
            self.receipts.push(PaymentReceipt {
                payment,
                amount,
                applied_date,
            });
        }
    }

    /// Submits a draft for approval.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` unless the invoice is a draft.
    pub fn submit(&mut self) -> Result<(), DocumentError> {
        self.require(&[InvoiceStatus::Draft], InvoiceStatus::PendingApproval)?;
        self.status = InvoiceStatus::PendingApproval;
        Ok(())
    }

    /// Approves the invoice.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` from any status other
    /// than draft or pending approval.
    pub fn approve(&mut self) -> Result<(), DocumentError> {
        self.require(
            &[InvoiceStatus::Draft, InvoiceStatus::PendingApproval],
            InvoiceStatus::Approved,
        )?;
        self.status = InvoiceStatus::Approved;
        Ok(())
    }

    /// Marks the invoice disputed.
    ///
    /// # Errors
    ///
    /// Returns an error if the invoice is paid, cancelled or already disputed.
    pub fn dispute(&mut self, reason: impl Into<String>) -> Result<(), DocumentError> {
        if matches!(
            self.status,
            InvoiceStatus::Paid | InvoiceStatus::Cancelled | InvoiceStatus::Disputed
        ) {
            return Err(DocumentError::transition(
                "invoice",
                self.status,
                InvoiceStatus::Disputed,
            ));
        }
        self.status = InvoiceStatus::Disputed;
        self.dispute_reason = Some(reason.into());
        Ok(())
    }

    /// Resolves a dispute; the invoice returns to the approved flow.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` unless disputed.
    pub fn resolve_dispute(&mut self) -> Result<(), DocumentError> {
        self.require(&[InvoiceStatus::Disputed], InvoiceStatus::Approved)?;
        self.status = InvoiceStatus::Approved;
        self.dispute_reason = None;
        Ok(())
    }

    /// Cancels the invoice.
    ///
    /// # Errors
    ///
    /// Returns an error once any payment has been applied or the invoice
    /// has been settled.
    pub fn cancel(&mut self) -> Result<(), DocumentError> {
        if self.status == InvoiceStatus::Cancelled
            || !self.receipts.is_empty()
            || self.settlement.is_some()
        {
            return Err(DocumentError::transition(
                "invoice",
                self.status,
                InvoiceStatus::Cancelled,
            ));
        }
        self.status = InvoiceStatus::Cancelled;
        Ok(())
    }

    /// Stamps the invoice as settled by `stamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if a different settlement already consumed it.
    pub fn mark_settled(&mut self, stamp: SettlementStamp) -> Result<(), DocumentError> {
        match &self.settlement {
            Some(existing) if existing.settlement.id != stamp.settlement.id => {
                Err(DocumentError::Validation(format!(
                    "Invoice {} already settled by {}",
                    self.number, existing.settlement.number
                )))
            }
            Some(_) => Ok(()),
            None => {
                self.settlement = Some(stamp);
                Ok(())
            }
        }
    }

    fn require(&self, allowed: &[InvoiceStatus], to: InvoiceStatus) -> Result<(), DocumentError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(DocumentError::transition("invoice", self.status, to))
        }
    }

    fn derived_status(&self, today: NaiveDate) -> InvoiceStatus {
        if !self.status.is_post_approval() {
            return self.status;
        }
        if self.amount_paid >= self.totals.total {
            InvoiceStatus::Paid
        } else if self.due_date < today {
            InvoiceStatus::Overdue
        } else if self.amount_paid > Decimal::ZERO {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::PendingPayment
        }
    }

    fn derived_match_status(&self) -> MatchStatus {
        let matched = self.lines.iter().filter(|l| l.matched).count();
        if matched == 0 {
            MatchStatus::Unmatched
        } else if matched < self.lines.len() {
            MatchStatus::PartiallyMatched
        } else if self.purchase_order.is_some() {
            MatchStatus::ThreeWayMatched
        } else {
            MatchStatus::Matched
        }
    }
}

/// Filter for invoice queries.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    /// Restrict to one customer.
    pub customer_id: Option<CustomerId>,
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<InvoiceStatus>,
    /// Restrict to these match statuses (empty = any).
    pub match_statuses: Vec<MatchStatus>,
    /// Earliest invoice date (inclusive).
    pub date_from: Option<NaiveDate>,
    /// Latest invoice date (inclusive).
    pub date_to: Option<NaiveDate>,
    /// Only invoices not yet consumed by a settlement.
    pub unsettled_only: bool,
}

impl Document for Invoice {
    type Id = InvoiceId;
    type Filter = InvoiceFilter;

    const KIND: DocumentKind = DocumentKind::Invoice;

    fn id(&self) -> InvoiceId {
        self.id
    }

    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    fn customer_id(&self) -> Option<CustomerId> {
        Some(self.customer_id)
    }

    fn status_label(&self) -> &'static str {
        self.status.as_str()
    }

    fn document_date(&self) -> NaiveDate {
        self.invoice_date
    }

    fn recompute_derived(mut self, today: NaiveDate) -> Self {
        for line in &mut self.lines {
            line.amount = line.quantity * line.unit_price;
        }
        self.totals = DocumentTotals::from_lines(&self.lines);
        self.total_base = to_base_amount(self.totals.total, self.exchange_rate);
        self.amount_paid = self.receipts.iter().map(|r| r.amount).sum();
        self.outstanding_amount = self.totals.total - self.amount_paid;
        self.match_status = self.derived_match_status();
        self.status = self.derived_status(today);
        self
    }

    fn check_invariants(&self) -> Result<(), DocumentError> {
        if !self.totals.is_consistent() {
            return Err(DocumentError::InvariantViolation(format!(
                "invoice {} totals are inconsistent",
                self.number
            )));
        }
        if self.amount_paid > self.totals.total {
            return Err(DocumentError::InvariantViolation(format!(
                "invoice {} amount paid {} exceeds total {}",
                self.number, self.amount_paid, self.totals.total
            )));
        }
        if self.exchange_rate <= Decimal::ZERO {
            return Err(DocumentError::InvariantViolation(format!(
                "invoice {} exchange rate must be positive",
                self.number
            )));
        }
        if self.due_date < self.invoice_date {
            return Err(DocumentError::InvariantViolation(format!(
                "invoice {} is due before it was issued",
                self.number
            )));
        }
        Ok(())
    }

    fn matches(&self, filter: &InvoiceFilter) -> bool {
        filter.customer_id.is_none_or(|c| c == self.customer_id)
            && status_allowed(&filter.statuses, &self.status)
            && status_allowed(&filter.match_statuses, &self.match_status)
            && date_in_range(self.invoice_date, filter.date_from, filter.date_to)
            && (!filter.unsettled_only || self.settlement.is_none())
    }

    fn filter_customer(filter: &InvoiceFilter) -> Option<CustomerId> {
        filter.customer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn sample_invoice() -> Invoice {
        Invoice::new(
            OrganizationId::new(),
            "INV-2001",
            CustomerId::new(),
            date(5),
            date(25),
            Currency::Usd,
            vec![
                InvoiceLine::new(1, ProductId::new(), dec!(10), dec!(20)),
                InvoiceLine::new(2, ProductId::new(), dec!(5), dec!(20)),
            ],
        )
    }

    fn payment_ref() -> DocRef<PaymentId> {
        DocRef::new(PaymentId::new(), "PAY-1")
    }

    #[test]
    fn test_approved_becomes_pending_payment() {
        let mut invoice = sample_invoice();
        invoice.approve().unwrap();
        let invoice = invoice.recompute_derived(date(10));
        assert_eq!(invoice.status, InvoiceStatus::PendingPayment);
        assert_eq!(invoice.outstanding_amount, dec!(300));
    }

    #[test]
    fn test_payment_status_precedence() {
        let mut invoice = sample_invoice();
        invoice.approve().unwrap();
        invoice.upsert_receipt(payment_ref(), dec!(100), date(10));
        let invoice = invoice.recompute_derived(date(10));
        assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);

        let invoice = invoice.recompute_derived(date(26));
        assert_eq!(invoice.status, InvoiceStatus::Overdue);

        let mut invoice = invoice;
        invoice.upsert_receipt(payment_ref(), dec!(200), date(27));
        let invoice = invoice.recompute_derived(date(27));
        assert_eq!(invoice.amount_paid, dec!(300));
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }

    #[test]
    fn test_receipt_upsert_replaces_amount() {
        let mut invoice = sample_invoice();
        let payment = payment_ref();
        invoice.upsert_receipt(payment.clone(), dec!(100), date(10));
        invoice.upsert_receipt(payment.clone(), dec!(150), date(11));
        assert_eq!(invoice.receipt_from(payment.id), dec!(150));
        assert_eq!(invoice.receipts.len(), 1);

        invoice.upsert_receipt(payment.clone(), Decimal::ZERO, date(12));
        assert!(invoice.receipts.is_empty());
    }

    #[test]
    fn test_pre_approval_status_not_derived() {
        let invoice = sample_invoice().recompute_derived(date(28));
        assert_eq!(invoice.status, InvoiceStatus::Draft);
    }

    #[test]
    fn test_match_status_derivation() {
        let mut invoice = sample_invoice();
        invoice.lines[0].matched = true;
        let mut invoice = invoice.recompute_derived(date(10));
        assert_eq!(invoice.match_status, MatchStatus::PartiallyMatched);

        invoice.lines[1].matched = true;
        let mut invoice = invoice.recompute_derived(date(10));
        assert_eq!(invoice.match_status, MatchStatus::Matched);

        invoice.purchase_order = Some(DocRef::new(PurchaseOrderId::new(), "PO-1"));
        let invoice = invoice.recompute_derived(date(10));
        assert_eq!(invoice.match_status, MatchStatus::ThreeWayMatched);
    }

    #[test]
    fn test_dispute_and_resolve() {
        let mut invoice = sample_invoice();
        invoice.approve().unwrap();
        invoice.dispute("short shipment").unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Disputed);
        assert!(invoice.dispute("again").is_err());

        invoice.resolve_dispute().unwrap();
        let invoice = invoice.recompute_derived(date(10));
        assert_eq!(invoice.status, InvoiceStatus::PendingPayment);
        assert!(invoice.dispute_reason.is_none());
    }

    #[test]
    fn test_cancel_rejected_once_paid() {
        let mut invoice = sample_invoice();
        invoice.approve().unwrap();
        invoice.upsert_receipt(payment_ref(), dec!(10), date(10));
        assert!(matches!(
            invoice.cancel(),
            Err(DocumentError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_overpayment_violates_invariants() {
        let mut invoice = sample_invoice();
        invoice.approve().unwrap();
        invoice.upsert_receipt(payment_ref(), dec!(301), date(10));
        let invoice = invoice.recompute_derived(date(10));
        assert!(invoice.check_invariants().is_err());
    }

    #[test]
    fn test_total_base_uses_exchange_rate() {
        let mut invoice = sample_invoice();
        invoice.exchange_rate = dec!(1.1);
        let invoice = invoice.recompute_derived(date(10));
        assert_eq!(invoice.total_base, dec!(330.0000));
    }

    #[test]
    fn test_match_status_serializes_three_way_name() {
        let json = serde_json::to_string(&MatchStatus::ThreeWayMatched).unwrap();
        assert_eq!(json, "\"3way_matched\"");
    }
}

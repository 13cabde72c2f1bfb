//! Purchase orders and their per-line invoicing state.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{
    Currency, CustomerId, InvoiceId, OrganizationId, ProductId, PurchaseOrderId, VendorId,
};

use super::{
    DocRef, Document, DocumentError, DocumentKind, DocumentTotals, PricedLine, status_allowed,
};

/// Purchase order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    /// Being prepared.
    Draft,
    /// Approved internally.
    Approved,
    /// Sent to the vendor.
    Sent,
    /// Acknowledged by the vendor.
    Acknowledged,
    /// Some goods received.
    PartiallyReceived,
    /// All goods received.
    Received,
    /// Closed for further activity.
    Closed,
    /// Cancelled.
    Cancelled,
}

impl PurchaseOrderStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Sent => "sent",
            Self::Acknowledged => "acknowledged",
            Self::PartiallyReceived => "partially_received",
            Self::Received => "received",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Approved => 1,
            Self::Sent => 2,
            Self::Acknowledged => 3,
            Self::PartiallyReceived => 4,
            Self::Received => 5,
            Self::Closed => 6,
            Self::Cancelled => 7,
        }
    }

    /// Returns true if the status may move to `to`.
    ///
    /// Statuses only move forward. `Cancelled` is reachable from any
    /// non-terminal status; `Closed` and `Cancelled` are terminal.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Closed | Self::Cancelled, _) => false,
            (_, Self::Cancelled) => true,
            (from, to) => to.rank() > from.rank(),
        }
    }

    /// Returns true if invoices may be matched against the order.
    #[must_use]
    pub const fn is_open_for_invoicing(self) -> bool {
        matches!(
            self,
            Self::Approved
                | Self::Sent
                | Self::Acknowledged
                | Self::PartiallyReceived
                | Self::Received
        )
    }
}

impl std::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoicing status of a single PO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderLineStatus {
    /// Nothing invoiced yet.
    #[default]
    Open,
    /// Some quantity invoiced.
    PartiallyInvoiced,
    /// Ordered quantity fully invoiced.
    FullyInvoiced,
}

/// Quantity and amount of one invoice line allocated against a PO line.
///
/// Allocations are keyed by `(invoice_id, invoice_line)`, so re-applying
/// the same match replaces rather than adds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceAllocation {
    /// Allocated invoice.
    pub invoice: DocRef<InvoiceId>,
    /// Invoice line number.
    pub invoice_line: u32,
    /// Quantity invoiced.
    pub quantity: Decimal,
    /// Amount invoiced.
    pub amount: Decimal,
}

/// A purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    /// Line number, unique within the order.
    pub line_number: u32,
    /// Ordered product.
    pub product_id: ProductId,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered quantity.
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
    /// Quantity received so far.
    #[serde(default)]
    pub quantity_received: Decimal,
    /// Derived: sum of allocated quantities.
    #[serde(default)]
    pub quantity_invoiced: Decimal,
    /// Derived: sum of allocated amounts.
    #[serde(default)]
    pub amount_invoiced: Decimal,
    /// Invoice allocations against this line.
    #[serde(default)]
    pub allocations: Vec<InvoiceAllocation>,
    /// Derived invoicing status.
    #[serde(default)]
    pub status: PurchaseOrderLineStatus,
}

impl PurchaseOrderLine {
    /// Creates a new line with nothing received or invoiced.
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
            quantity_received: Decimal::ZERO,
            quantity_invoiced: Decimal::ZERO,
            amount_invoiced: Decimal::ZERO,
            allocations: Vec::new(),
            status: PurchaseOrderLineStatus::Open,
        }
    }

    /// Quantity not yet invoiced by any invoice.
    #[must_use]
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.quantity_invoiced
    }

    /// Quantity not invoiced by invoices other than `invoice_id`.
    ///
    /// Matching evaluates against this so re-running a match for the same
    /// invoice sees the same availability as the first run.
    #[must_use]
    pub fn remaining_quantity_excluding(&self, invoice_id: InvoiceId) -> Decimal {
        let others: Decimal = self
            .allocations
            .iter()
            .filter(|a| a.invoice.id != invoice_id)
            .map(|a| a.quantity)
            .sum();
        self.quantity - others
    }

    /// Inserts or replaces the allocation for `(invoice, invoice_line)`.
    pub fn upsert_allocation(&mut self, allocation: InvoiceAllocation) {
        match self.allocations.iter_mut().find(|a| {
            a.invoice.id == allocation.invoice.id && a.invoice_line == allocation.invoice_line
        }) {
            Some(existing) => *existing = allocation,
            None => self.allocations.push(allocation),
        }
    }

    /// Removes every allocation belonging to `invoice_id`.
    pub fn remove_allocations_for(&mut self, invoice_id: InvoiceId) {
        self.allocations.retain(|a| a.invoice.id != invoice_id);
    }

    fn recompute(&mut self) {
        self.amount = self.quantity * self.unit_price;
        self.quantity_invoiced = self.allocations.iter().map(|a| a.quantity).sum();
        self.amount_invoiced = self.allocations.iter().map(|a| a.amount).sum();
        self.status = if self.quantity_invoiced.is_zero() {
            PurchaseOrderLineStatus::Open
        } else if self.quantity_invoiced >= self.quantity {
            PurchaseOrderLineStatus::FullyInvoiced
        } else {
            PurchaseOrderLineStatus::PartiallyInvoiced
        };
    }
}

impl PricedLine for PurchaseOrderLine {
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

/// A customer purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    /// Order ID.
    pub id: PurchaseOrderId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Order number.
    pub number: String,
    /// Ordering customer.
    pub customer_id: CustomerId,
    /// Supplying vendor, if tracked.
    #[serde(default)]
    pub vendor_id: Option<VendorId>,
    /// Order date.
    pub order_date: NaiveDate,
    /// Expected delivery date.
    #[serde(default)]
    pub expected_date: Option<NaiveDate>,
    /// Order currency.
    pub currency: Currency,
    /// Lifecycle status.
    pub status: PurchaseOrderStatus,
    /// Order lines.
    pub lines: Vec<PurchaseOrderLine>,
    /// Derived header totals.
    #[serde(default)]
    pub totals: DocumentTotals,
    /// Free-text notes.
    #[serde(default)]
    pub notes: Option<String>,
}

impl PurchaseOrder {
    /// Creates a draft order.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        number: impl Into<String>,
        customer_id: CustomerId,
        order_date: NaiveDate,
        currency: Currency,
        lines: Vec<PurchaseOrderLine>,
    ) -> Self {
        let totals = DocumentTotals::from_lines(&lines);
        Self {
            id: PurchaseOrderId::new(),
            organization_id,
            number: number.into(),
            customer_id,
            vendor_id: None,
            order_date,
            expected_date: None,
            currency,
            status: PurchaseOrderStatus::Draft,
            lines,
            totals,
            notes: None,
        }
    }

    /// Returns a reference to this order.
    #[must_use]
    pub fn doc_ref(&self) -> DocRef<PurchaseOrderId> {
        DocRef::new(self.id, self.number.clone())
    }

    /// Looks up a line by number.
    #[must_use]
    pub fn line(&self, line_number: u32) -> Option<&PurchaseOrderLine> {
        self.lines.iter().find(|l| l.line_number == line_number)
    }

    /// Looks up a line by number for mutation.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::LineNotFound` if the line does not exist.
    pub fn line_mut(&mut self, line_number: u32) -> Result<&mut PurchaseOrderLine, DocumentError> {
        self.lines
            .iter_mut()
            .find(|l| l.line_number == line_number)
            .ok_or(DocumentError::LineNotFound { line_number })
    }

    /// Moves the order to a new status.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` for backward moves or
    /// moves out of a terminal status.
    pub fn transition(&mut self, to: PurchaseOrderStatus) -> Result<(), DocumentError> {
        if !self.status.can_transition_to(to) {
            return Err(DocumentError::transition("purchase order", self.status, to));
        }
        self.status = to;
        Ok(())
    }

    /// Records a goods receipt against a line.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is not open, the quantity is not
    /// positive, or the line does not exist.
    pub fn record_receipt(&mut self, line_number: u32, quantity: Decimal) -> Result<(), DocumentError> {
        if !self.status.is_open_for_invoicing() {
            return Err(DocumentError::Validation(format!(
                "Cannot receive goods on a {} purchase order",
                self.status
            )));
        }
        if quantity <= Decimal::ZERO {
            return Err(DocumentError::Validation(
                "Received quantity must be positive".to_string(),
            ));
        }
        let line = self.line_mut(line_number)?;
        line.quantity_received += quantity;
        Ok(())
    }

    /// Drops every allocation made by `invoice_id`.
    pub fn remove_allocations_for(&mut self, invoice_id: InvoiceId) {
        for line in &mut self.lines {
            line.remove_allocations_for(invoice_id);
        }
    }

    fn derived_status(&self) -> PurchaseOrderStatus {
        let receivable = matches!(
            self.status,
            PurchaseOrderStatus::Approved
                | PurchaseOrderStatus::Sent
                | PurchaseOrderStatus::Acknowledged
                | PurchaseOrderStatus::PartiallyReceived
        );
        if !receivable || self.lines.iter().all(|l| l.quantity_received.is_zero()) {
            return self.status;
        }
        if self.lines.iter().all(|l| l.quantity_received >= l.quantity) {
            PurchaseOrderStatus::Received
        } else if self.status.can_transition_to(PurchaseOrderStatus::PartiallyReceived) {
            PurchaseOrderStatus::PartiallyReceived
        } else {
            self.status
        }
    }
}

/// Filter for purchase order queries.
#[derive(Debug, Clone, Default)]
pub struct PurchaseOrderFilter {
    /// Restrict to one customer.
    pub customer_id: Option<CustomerId>,
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<PurchaseOrderStatus>,
    /// Exact order number.
    pub number: Option<String>,
}

impl PurchaseOrderFilter {
    /// Orders of one customer that still accept invoices.
    #[must_use]
    pub fn open_for_customer(customer_id: CustomerId) -> Self {
        Self {
            customer_id: Some(customer_id),
            statuses: vec![
                PurchaseOrderStatus::Approved,
                PurchaseOrderStatus::Sent,
                PurchaseOrderStatus::Acknowledged,
                PurchaseOrderStatus::PartiallyReceived,
                PurchaseOrderStatus::Received,
            ],
            number: None,
        }
    }
}

impl Document for PurchaseOrder {
    type Id = PurchaseOrderId;
    type Filter = PurchaseOrderFilter;

    const KIND: DocumentKind = DocumentKind::PurchaseOrder;

    fn id(&self) -> PurchaseOrderId {
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
        self.order_date
    }

    fn recompute_derived(mut self, _today: NaiveDate) -> Self {
        for line in &mut self.lines {
            line.recompute();
        }
        self.totals = DocumentTotals::from_lines(&self.lines);
        self.status = self.derived_status();
        self
    }

    fn check_invariants(&self) -> Result<(), DocumentError> {
        if !self.totals.is_consistent() {
            return Err(DocumentError::InvariantViolation(format!(
                "purchase order {} totals are inconsistent",
                self.number
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for line in &self.lines {
            if !seen.insert(line.line_number) {
                return Err(DocumentError::InvariantViolation(format!(
                    "purchase order {} has duplicate line {}",
                    self.number, line.line_number
                )));
            }
            if line.quantity < Decimal::ZERO || line.quantity_received < Decimal::ZERO {
                return Err(DocumentError::InvariantViolation(format!(
                    "purchase order {} line {} has a negative quantity",
                    self.number, line.line_number
                )));
            }
        }
        Ok(())
    }

    fn matches(&self, filter: &PurchaseOrderFilter) -> bool {
        filter.customer_id.is_none_or(|c| c == self.customer_id)
            && status_allowed(&filter.statuses, &self.status)
            && filter.number.as_ref().is_none_or(|n| *n == self.number)
    }

    fn filter_customer(filter: &PurchaseOrderFilter) -> Option<CustomerId> {
        filter.customer_id
    }
}

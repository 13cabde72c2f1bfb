//! Settlements: periodic netting of a customer's invoices, payments,
//! deductions and adjustments.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{Currency, CustomerId, OrganizationId, SettlementId};
use uuid::Uuid;

use super::{DocRef, Document, DocumentError, DocumentKind, status_allowed};
use crate::workflow::ApprovalState;

/// Settlement lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Snapshot taken, editable.
    Draft,
    /// Waiting on the approval chain.
    PendingApproval,
    /// Approved, ready to process.
    Approved,
    /// Items are being settled.
    Processing,
    /// All items settled.
    Completed,
    /// Processing failed for at least one item.
    Failed,
    /// Cancelled.
    Cancelled,
}

impl SettlementStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses in which the settlement still holds its items.
    pub const OPEN: [Self; 5] = [
        Self::Draft,
        Self::PendingApproval,
        Self::Approved,
        Self::Processing,
        Self::Failed,
    ];
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of document a settlement item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementItemType {
    /// Invoice receivable.
    Invoice,
    /// Payment received.
    Payment,
    /// Deduction taken.
    Deduction,
    /// Credit memo issued to the customer.
    CreditMemo,
    /// Debit memo charged to the customer.
    DebitMemo,
    /// Manual adjustment (signed).
    Adjustment,
}

impl SettlementItemType {
    /// Returns the string representation of the type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Payment => "payment",
            Self::Deduction => "deduction",
            Self::CreditMemo => "credit_memo",
            Self::DebitMemo => "debit_memo",
            Self::Adjustment => "adjustment",
        }
    }

    /// Returns true for item types that reference a stored document.
    #[must_use]
    pub const fn references_document(self) -> bool {
        matches!(self, Self::Invoice | Self::Payment | Self::Deduction)
    }
}

impl std::fmt::Display for SettlementItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a settlement snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementItem {
    /// Item type.
    pub item_type: SettlementItemType,
    /// ID of the referenced document (fresh ID for memos and adjustments).
    pub reference_id: Uuid,
    /// Number of the referenced document.
    pub reference_number: String,
    /// Amount; positive except for adjustments, which carry their sign.
    pub amount: Decimal,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the item has been settled.
    #[serde(default)]
    pub settled: bool,
    /// When the item was settled.
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
    /// Last failure while settling the item.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl SettlementItem {
    /// Creates an unsettled item.
    #[must_use]
    pub fn new(
        item_type: SettlementItemType,
        reference_id: Uuid,
        reference_number: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            item_type,
            reference_id,
            reference_number: reference_number.into(),
            amount,
            description: None,
            settled: false,
            settled_at: None,
            failure_reason: None,
        }
    }
}

/// Inclusive settlement date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPeriod {
    /// First day (inclusive).
    pub start: NaiveDate,
    /// Last day (inclusive).
    pub end: NaiveDate,
}

impl SettlementPeriod {
    /// Returns true if the date falls inside the period.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Derived settlement totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTotals {
    /// Sum of invoice items.
    pub total_invoices: Decimal,
    /// Sum of payment items.
    pub total_payments: Decimal,
    /// Sum of deduction items.
    pub total_deductions: Decimal,
    /// Adjustments + debit memos - credit memos.
    pub total_adjustments: Decimal,
    /// Invoices - payments - deductions + adjustments.
    pub net_settlement: Decimal,
}

impl SettlementTotals {
    /// Computes totals from items.
    #[must_use]
    pub fn from_items(items: &[SettlementItem]) -> Self {
        let mut totals = Self::default();
        for item in items {
            match item.item_type {
                SettlementItemType::Invoice => totals.total_invoices += item.amount,
                SettlementItemType::Payment => totals.total_payments += item.amount,
                SettlementItemType::Deduction => totals.total_deductions += item.amount,
                SettlementItemType::Adjustment | SettlementItemType::DebitMemo => {
                    totals.total_adjustments += item.amount;
                }
                SettlementItemType::CreditMemo => totals.total_adjustments -= item.amount,
            }
        }
        totals.net_settlement = totals.total_invoices - totals.total_payments
            - totals.total_deductions
            + totals.total_adjustments;
        totals
    }
}

/// Stamp left on source documents consumed by a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementStamp {
    /// Consuming settlement.
    pub settlement: DocRef<SettlementId>,
    /// When the document was settled.
    pub settled_at: DateTime<Utc>,
}

#[cfg(test)]
impl SettlementStamp {
    pub(crate) fn sample() -> Self {
        Self {
            settlement: DocRef::new(SettlementId::new(), "STL-TEST"),
            settled_at: Utc::now(),
        }
    }
}

/// Result of reconciling a completed settlement with a bank statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankReconciliation {
    /// Amount on the bank statement.
    pub bank_amount: Decimal,
    /// `bank_amount - net_settlement`.
    pub variance: Decimal,
    /// Statement reference.
    #[serde(default)]
    pub statement_reference: Option<String>,
    /// When the reconciliation was recorded.
    pub reconciled_at: DateTime<Utc>,
}

/// A customer settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Settlement ID.
    pub id: SettlementId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Settlement number.
    pub number: String,
    /// Settled customer.
    pub customer_id: CustomerId,
    /// Settlement date.
    pub settlement_date: NaiveDate,
    /// Covered period.
    pub period: SettlementPeriod,
    /// Currency of every item.
    pub currency: Currency,
    /// Lifecycle status.
    pub status: SettlementStatus,
    /// Snapshot items.
    pub items: Vec<SettlementItem>,
    /// Derived totals.
    #[serde(default)]
    pub totals: SettlementTotals,
    /// Derived: number of items.
    #[serde(default)]
    pub item_count: usize,
    /// Derived: number of settled items.
    #[serde(default)]
    pub settled_item_count: usize,
    /// Derived: settled share of items, in percent.
    #[serde(default)]
    pub completion_percent: Decimal,
    /// Approval chain and history.
    #[serde(default)]
    pub approval: ApprovalState,
    /// Failures from the last processing run.
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Cancellation reason.
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    /// When processing started.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// When processing completed.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the GL posting was handed to the ledger.
    #[serde(default)]
    pub posted_to_ledger_at: Option<DateTime<Utc>>,
    /// Bank statement reconciliation.
    #[serde(default)]
    pub bank_reconciliation: Option<BankReconciliation>,
}

impl Settlement {
    /// Creates a draft settlement from snapshot items.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        number: impl Into<String>,
        customer_id: CustomerId,
        settlement_date: NaiveDate,
        period: SettlementPeriod,
        currency: Currency,
        items: Vec<SettlementItem>,
    ) -> Self {
        Self {
            id: SettlementId::new(),
            organization_id,
            number: number.into(),
            customer_id,
            settlement_date,
            period,
            currency,
            status: SettlementStatus::Draft,
            totals: SettlementTotals::from_items(&items),
            item_count: items.len(),
            settled_item_count: 0,
            completion_percent: Decimal::ZERO,
            items,
            approval: ApprovalState::default(),
            failure_reason: None,
            cancellation_reason: None,
            processed_at: None,
            completed_at: None,
            posted_to_ledger_at: None,
            bank_reconciliation: None,
        }
    }

    /// Returns a reference to this settlement.
    #[must_use]
    pub fn doc_ref(&self) -> DocRef<SettlementId> {
        DocRef::new(self.id, self.number.clone())
    }

    /// Builds the stamp written on consumed source documents.
    #[must_use]
    pub fn stamp(&self, settled_at: DateTime<Utc>) -> SettlementStamp {
        SettlementStamp {
            settlement: self.doc_ref(),
            settled_at,
        }
    }

    /// Returns true if the settlement references the document.
    #[must_use]
    pub fn references(&self, reference_id: Uuid) -> bool {
        self.items.iter().any(|i| i.reference_id == reference_id)
    }

    /// Moves the settlement to `to` if its status is one of `allowed`.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` otherwise.
    pub fn transition(
        &mut self,
        allowed: &[SettlementStatus],
        to: SettlementStatus,
    ) -> Result<(), DocumentError> {
        if !allowed.contains(&self.status) {
            return Err(DocumentError::transition("settlement", self.status, to));
        }
        self.status = to;
        Ok(())
    }
}

/// Filter for settlement queries.
#[derive(Debug, Clone, Default)]
pub struct SettlementFilter {
    /// Restrict to one customer.
    pub customer_id: Option<CustomerId>,
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<SettlementStatus>,
}

impl Document for Settlement {
    type Id = SettlementId;
    type Filter = SettlementFilter;

    const KIND: DocumentKind = DocumentKind::Settlement;

    fn id(&self) -> SettlementId {
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
        self.settlement_date
    }

    fn recompute_derived(mut self, _today: NaiveDate) -> Self {
        self.totals = SettlementTotals::from_items(&self.items);
        self.item_count = self.items.len();
        self.settled_item_count = self.items.iter().filter(|i| i.settled).count();
        self.completion_percent = if self.item_count == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(self.settled_item_count) * Decimal::ONE_HUNDRED
                / Decimal::from(self.item_count))
            .round_dp(2)
        };
        self
    }

    fn check_invariants(&self) -> Result<(), DocumentError> {
        if self.period.start > self.period.end {
            return Err(DocumentError::InvariantViolation(format!(
                "settlement {} period starts after it ends",
                self.number
            )));
        }
        if self.status == SettlementStatus::Completed && self.settled_item_count != self.item_count {
            return Err(DocumentError::InvariantViolation(format!(
                "settlement {} is completed with unsettled items",
                self.number
            )));
        }
        if self
            .items
            .iter()
            .any(|i| i.item_type != SettlementItemType::Adjustment && i.amount < Decimal::ZERO)
        {
            return Err(DocumentError::InvariantViolation(format!(
                "settlement {} has a negative non-adjustment item",
                self.number
            )));
        }
        Ok(())
    }

    fn matches(&self, filter: &SettlementFilter) -> bool {
        filter.customer_id.is_none_or(|c| c == self.customer_id)
            && status_allowed(&filter.statuses, &self.status)
    }

    fn filter_customer(filter: &SettlementFilter) -> Option<CustomerId> {
        filter.customer_id
    }
}

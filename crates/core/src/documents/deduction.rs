//! Customer deductions (short payments claimed against trade spend).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{Currency, CustomerId, DeductionId, OrganizationId, PaymentId};

use super::settlement::SettlementStamp;
use super::{DocRef, Document, DocumentError, DocumentKind, date_in_range, status_allowed};

/// Deduction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionStatus {
    /// Claimed, not yet validated.
    Open,
    /// Validated; eligible for settlement.
    Approved,
    /// Rejected as invalid.
    Rejected,
    /// Consumed by a settlement.
    Settled,
}

impl DeductionStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Settled => "settled",
        }
    }
}

impl std::fmt::Display for DeductionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    /// Deduction ID.
    pub id: DeductionId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Deduction number.
    pub number: String,
    /// Customer taking the deduction.
    pub customer_id: CustomerId,
    /// Date the deduction was taken.
    pub deduction_date: NaiveDate,
    /// Deducted amount (positive).
    pub amount: Decimal,
    /// Currency.
    pub currency: Currency,
    /// Reason code or text.
    pub reason: String,
    /// Lifecycle status.
    pub status: DeductionStatus,
    /// Payment the deduction was taken from.
    #[serde(default)]
    pub payment: Option<DocRef<PaymentId>>,
    /// Settlement that consumed the deduction.
    #[serde(default)]
    pub settlement: Option<SettlementStamp>,
}

impl Deduction {
    /// Creates an open deduction.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        number: impl Into<String>,
        customer_id: CustomerId,
        deduction_date: NaiveDate,
        amount: Decimal,
        currency: Currency,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: DeductionId::new(),
            organization_id,
            number: number.into(),
            customer_id,
            deduction_date,
            amount,
            currency,
            reason: reason.into(),
            status: DeductionStatus::Open,
            payment: None,
            settlement: None,
        }
    }

    /// Returns a reference to this deduction.
    #[must_use]
    pub fn doc_ref(&self) -> DocRef<DeductionId> {
        DocRef::new(self.id, self.number.clone())
    }

    /// Approves an open deduction.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` unless open.
    pub fn approve(&mut self) -> Result<(), DocumentError> {
        self.move_to(DeductionStatus::Open, DeductionStatus::Approved)
    }

    /// Rejects an open deduction.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` unless open.
    pub fn reject(&mut self) -> Result<(), DocumentError> {
        self.move_to(DeductionStatus::Open, DeductionStatus::Rejected)
    }

    /// Marks an approved deduction settled. Repeating with the same
    /// settlement is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the deduction is not approved or was settled by
    /// another settlement.
    pub fn mark_settled(&mut self, stamp: SettlementStamp) -> Result<(), DocumentError> {
        if let Some(existing) = &self.settlement {
            if existing.settlement.id == stamp.settlement.id {
                return Ok(());
            }
            return Err(DocumentError::Validation(format!(
                "Deduction {} already settled by {}",
                self.number, existing.settlement.number
            )));
        }
        self.move_to(DeductionStatus::Approved, DeductionStatus::Settled)?;
        self.settlement = Some(stamp);
        Ok(())
    }

    fn move_to(&mut self, from: DeductionStatus, to: DeductionStatus) -> Result<(), DocumentError> {
        if self.status != from {
            return Err(DocumentError::transition("deduction", self.status, to));
        }
        self.status = to;
        Ok(())
    }
}

/// Filter for deduction queries.
#[derive(Debug, Clone, Default)]
pub struct DeductionFilter {
    /// Restrict to one customer.
    pub customer_id: Option<CustomerId>,
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<DeductionStatus>,
    /// Earliest deduction date (inclusive).
    pub date_from: Option<NaiveDate>,
    /// Latest deduction date (inclusive).
    pub date_to: Option<NaiveDate>,
}

impl Document for Deduction {
    type Id = DeductionId;
    type Filter = DeductionFilter;

    const KIND: DocumentKind = DocumentKind::Deduction;

    fn id(&self) -> DeductionId {
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
        self.deduction_date
    }

    fn recompute_derived(self, _today: NaiveDate) -> Self {
        self
    }

    fn check_invariants(&self) -> Result<(), DocumentError> {
        if self.amount <= Decimal::ZERO {
            return Err(DocumentError::InvariantViolation(format!(
                "deduction {} amount must be positive",
                self.number
            )));
        }
        if (self.status == DeductionStatus::Settled) != self.settlement.is_some() {
            return Err(DocumentError::InvariantViolation(format!(
                "deduction {} settlement stamp does not match its status",
                self.number
            )));
        }
        Ok(())
    }

    fn matches(&self, filter: &DeductionFilter) -> bool {
        filter.customer_id.is_none_or(|c| c == self.customer_id)
            && status_allowed(&filter.statuses, &self.status)
            && date_in_range(self.deduction_date, filter.date_from, filter.date_to)
    }

    fn filter_customer(filter: &DeductionFilter) -> Option<CustomerId> {
        filter.customer_id
    }
}

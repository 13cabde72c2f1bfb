//! Customer payments and how they are applied to invoices.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{Currency, CustomerId, DeductionId, InvoiceId, OrganizationId, PaymentId};

use super::settlement::SettlementStamp;
use super::{DocRef, Document, DocumentError, DocumentKind, date_in_range, status_allowed};

/// Payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Recorded, not yet processed.
    Pending,
    /// In flight with the bank.
    Processing,
    /// Funds cleared.
    Cleared,
    /// Returned by the bank.
    Bounced,
    /// Reversed after clearing.
    Reversed,
    /// Cancelled before processing completed.
    Cancelled,
}

impl PaymentStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Cleared => "cleared",
            Self::Bounced => "bounced",
            Self::Reversed => "reversed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses that may be applied to invoices.
    #[must_use]
    pub const fn is_applicable(self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Cleared)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// ACH transfer.
    #[default]
    Ach,
    /// Wire transfer.
    Wire,
    /// Check.
    Check,
    /// Card.
    Card,
    /// Anything else.
    Other,
}

/// Derived application state of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMatchStatus {
    /// Nothing applied.
    #[default]
    Unmatched,
    /// Partly applied.
    PartiallyMatched,
    /// Fully applied.
    Matched,
}

impl PaymentMatchStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::PartiallyMatched => "partially_matched",
            Self::Matched => "matched",
        }
    }
}

/// Amount of the payment applied to one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplication {
    /// Invoice receiving the amount.
    pub invoice: DocRef<InvoiceId>,
    /// Amount applied.
    pub applied_amount: Decimal,
    /// Date of the latest application.
    pub applied_date: NaiveDate,
}

/// Deduction taken by the customer against the payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDeduction {
    /// Deduction document.
    pub deduction: DocRef<DeductionId>,
    /// Deducted amount.
    pub amount: Decimal,
    /// Reason given by the customer.
    pub reason: String,
}

/// A customer payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID.
    pub id: PaymentId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Payment number.
    pub number: String,
    /// Paying customer.
    pub customer_id: CustomerId,
    /// Payment date.
    pub payment_date: NaiveDate,
    /// Gross amount.
    pub amount: Decimal,
    /// Payment currency.
    pub currency: Currency,
    /// Payment method.
    #[serde(default)]
    pub method: PaymentMethod,
    /// Bank or remittance reference.
    #[serde(default)]
    pub reference: Option<String>,
    /// Lifecycle status.
    pub status: PaymentStatus,
    /// Invoice applications.
    #[serde(default)]
    pub applications: Vec<PaymentApplication>,
    /// Deductions taken against the payment.
    #[serde(default)]
    pub deductions: Vec<PaymentDeduction>,
    /// Derived: sum of applications.
    #[serde(default)]
    pub applied_amount: Decimal,
    /// Derived: sum of deductions.
    #[serde(default)]
    pub deduction_amount: Decimal,
    /// Derived: `amount - applied_amount - deduction_amount`.
    #[serde(default)]
    pub unapplied_amount: Decimal,
    /// Derived application state.
    #[serde(default)]
    pub match_status: PaymentMatchStatus,
    /// Settlement that consumed the payment.
    #[serde(default)]
    pub settlement: Option<SettlementStamp>,
}

impl Payment {
    /// Creates a pending payment.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        number: impl Into<String>,
        customer_id: CustomerId,
        payment_date: NaiveDate,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            organization_id,
            number: number.into(),
            customer_id,
            payment_date,
            amount,
            currency,
            method: PaymentMethod::default(),
            reference: None,
            status: PaymentStatus::Pending,
            applications: Vec::new(),
            deductions: Vec::new(),
            applied_amount: Decimal::ZERO,
            deduction_amount: Decimal::ZERO,
            unapplied_amount: amount,
            match_status: PaymentMatchStatus::Unmatched,
            settlement: None,
        }
    }

    /// Returns a reference to this payment.
    #[must_use]
    pub fn doc_ref(&self) -> DocRef<PaymentId> {
        DocRef::new(self.id, self.number.clone())
    }

    /// Amount currently applied to one invoice.
    #[must_use]
    pub fn applied_to(&self, invoice_id: InvoiceId) -> Decimal {
        self.applications
            .iter()
            .find(|a| a.invoice.id == invoice_id)
            .map_or(Decimal::ZERO, |a| a.applied_amount)
    }

    fn available(&self) -> Decimal {
        self.amount
            - self.applications.iter().map(|a| a.applied_amount).sum::<Decimal>()
            - self.deductions.iter().map(|d| d.amount).sum::<Decimal>()
    }

    /// Applies `amount` to an invoice, adding to any earlier application.
    ///
    /// # Errors
    ///
    /// Returns an error if the payment cannot be applied in its status, the
    /// amount is not positive, or it exceeds the unapplied balance.
    pub fn apply(
        &mut self,
        invoice: DocRef<InvoiceId>,
        amount: Decimal,
        applied_date: NaiveDate,
    ) -> Result<(), DocumentError> {
        if !self.status.is_applicable() {
            return Err(DocumentError::Validation(format!(
                "Payment {} is {} and cannot be applied",
                self.number, self.status
            )));
        }
        if amount <= Decimal::ZERO {
            return Err(DocumentError::Validation(
                "Applied amount must be positive".to_string(),
            ));
        }
        let available = self.available();
        if amount > available {
            return Err(DocumentError::Validation(format!(
                "Applied amount {amount} exceeds unapplied balance {available}"
            )));
        }

        match self.applications.iter_mut().find(|a| a.invoice.id == invoice.id) {
            Some(existing) => {
                existing.applied_amount += amount;
                existing.applied_date = applied_date;
            }
            None => self.applications.push(PaymentApplication {
                invoice,
                applied_amount: amount,
                applied_date,
            }),
        }
        Ok(())
    }

    /// Records a deduction taken against the payment.
    ///
    /// # Errors
    ///
    /// Returns an error if the amount is not positive, exceeds the
    /// unapplied balance, or the deduction is already recorded.
    pub fn add_deduction(
        &mut self,
        deduction: DocRef<DeductionId>,
        amount: Decimal,
        reason: impl Into<String>,
    ) -> Result<(), DocumentError> {
        if amount <= Decimal::ZERO {
            return Err(DocumentError::Validation(
                "Deduction amount must be positive".to_string(),
            ));
        }
        if self.deductions.iter().any(|d| d.deduction.id == deduction.id) {
            return Err(DocumentError::Validation(format!(
                "Deduction {} already recorded on payment {}",
                deduction.number, self.number
            )));
        }
        let available = self.available();
        if amount > available {
            return Err(DocumentError::Validation(format!(
                "Deduction {amount} exceeds unapplied balance {available}"
            )));
        }
        self.deductions.push(PaymentDeduction {
            deduction,
            amount,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Starts processing a pending payment.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` unless pending.
    pub fn process(&mut self) -> Result<(), DocumentError> {
        self.move_to(&[PaymentStatus::Pending], PaymentStatus::Processing)
    }

    /// Marks the payment cleared.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` unless pending or processing.
    pub fn clear(&mut self) -> Result<(), DocumentError> {
        self.move_to(
            &[PaymentStatus::Pending, PaymentStatus::Processing],
            PaymentStatus::Cleared,
        )
    }

    /// Marks the payment bounced.
    ///
    /// # Errors
    ///
    /// Returns an error unless processing or cleared and not yet settled.
    pub fn bounce(&mut self) -> Result<(), DocumentError> {
        self.require_unsettled(PaymentStatus::Bounced)?;
        self.move_to(
            &[PaymentStatus::Processing, PaymentStatus::Cleared],
            PaymentStatus::Bounced,
        )
    }

    /// Reverses a cleared payment.
    ///
    /// # Errors
    ///
    /// Returns an error unless cleared and not yet settled.
    pub fn reverse(&mut self) -> Result<(), DocumentError> {
        self.require_unsettled(PaymentStatus::Reversed)?;
        self.move_to(&[PaymentStatus::Cleared], PaymentStatus::Reversed)
    }

    /// Cancels a payment that has not cleared.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` unless pending or processing.
    pub fn cancel(&mut self) -> Result<(), DocumentError> {
        self.move_to(
            &[PaymentStatus::Pending, PaymentStatus::Processing],
            PaymentStatus::Cancelled,
        )
    }

    /// Stamps the payment as settled by `stamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payment has not cleared or a different
    /// settlement already consumed it.
    pub fn mark_settled(&mut self, stamp: SettlementStamp) -> Result<(), DocumentError> {
        if self
            .settlement
            .as_ref()
            .is_some_and(|existing| existing.settlement.id == stamp.settlement.id)
        {
            return Ok(());
        }
        if self.status != PaymentStatus::Cleared {
            return Err(DocumentError::Validation(format!(
                "Payment {} is {} and cannot be settled",
                self.number, self.status
            )));
        }
        match &self.settlement {
            Some(existing) if existing.settlement.id != stamp.settlement.id => {
                Err(DocumentError::Validation(format!(
                    "Payment {} already settled by {}",
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

    fn require_unsettled(&self, to: PaymentStatus) -> Result<(), DocumentError> {
        if self.settlement.is_some() {
            return Err(DocumentError::transition("payment", self.status, to));
        }
        Ok(())
    }

    fn move_to(&mut self, allowed: &[PaymentStatus], to: PaymentStatus) -> Result<(), DocumentError> {
        if !allowed.contains(&self.status) {
            return Err(DocumentError::transition("payment", self.status, to));
        }
        self.status = to;
        Ok(())
    }
}

/// Filter for payment queries.
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    /// Restrict to one customer.
    pub customer_id: Option<CustomerId>,
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<PaymentStatus>,
    /// Earliest payment date (inclusive).
    pub date_from: Option<NaiveDate>,
    /// Latest payment date (inclusive).
    pub date_to: Option<NaiveDate>,
    /// Only payments not yet consumed by a settlement.
    pub unsettled_only: bool,
    /// Only payments with an unapplied balance.
    pub with_unapplied_only: bool,
}

impl Document for Payment {
    type Id = PaymentId;
    type Filter = PaymentFilter;

    const KIND: DocumentKind = DocumentKind::Payment;

    fn id(&self) -> PaymentId {
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
        self.payment_date
    }

    fn recompute_derived(mut self, _today: NaiveDate) -> Self {
        self.applied_amount = self.applications.iter().map(|a| a.applied_amount).sum();
        self.deduction_amount = self.deductions.iter().map(|d| d.amount).sum();
        self.unapplied_amount = self.amount - self.applied_amount - self.deduction_amount;
        self.match_status = if self.applied_amount.is_zero() {
            PaymentMatchStatus::Unmatched
        } else if self.applied_amount >= self.amount {
            PaymentMatchStatus::Matched
        } else {
            PaymentMatchStatus::PartiallyMatched
        };
        self
    }

    fn check_invariants(&self) -> Result<(), DocumentError> {
        if self.amount <= Decimal::ZERO {
            return Err(DocumentError::InvariantViolation(format!(
                "payment {} amount must be positive",
                self.number
            )));
        }
        if self.unapplied_amount < Decimal::ZERO {
            return Err(DocumentError::InvariantViolation(format!(
                "payment {} is over-applied by {}",
                self.number, -self.unapplied_amount
            )));
        }
        if self.applied_amount + self.deduction_amount + self.unapplied_amount != self.amount {
            return Err(DocumentError::InvariantViolation(format!(
                "payment {} applied, deducted and unapplied amounts do not sum to the total",
                self.number
            )));
        }
        Ok(())
    }

    fn matches(&self, filter: &PaymentFilter) -> bool {
        filter.customer_id.is_none_or(|c| c == self.customer_id)
            && status_allowed(&filter.statuses, &self.status)
            && date_in_range(self.payment_date, filter.date_from, filter.date_to)
            && (!filter.unsettled_only || self.settlement.is_none())
            && (!filter.with_unapplied_only || self.unapplied_amount > Decimal::ZERO)
    }

    fn filter_customer(filter: &PaymentFilter) -> Option<CustomerId> {
        filter.customer_id
    }
}

//! Accruals: period estimates of trade spend owed, tracked against actuals.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{AccrualId, Currency, CustomerId, OrganizationId, SpendAgreementId, UserId};

use super::period::AccrualPeriod;
use super::spend_agreement::SpendKind;
use super::{DocRef, Document, DocumentError, DocumentKind, status_allowed};
use crate::workflow::ApprovalState;

/// Kind of accrual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccrualType {
    /// Trade spend program.
    TradeSpend,
    /// Promotion.
    Promotion,
    /// Volume rebate.
    Rebate,
    /// Anything else.
    Other,
}

impl From<SpendKind> for AccrualType {
    fn from(kind: SpendKind) -> Self {
        match kind {
            SpendKind::TradeSpend => Self::TradeSpend,
            SpendKind::Promotion => Self::Promotion,
        }
    }
}

/// Accrual lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccrualStatus {
    /// Calculated, awaiting approval.
    Draft,
    /// Approved and booked.
    Posted,
    /// Booked and manually adjusted.
    Adjusted,
    /// Actuals within tolerance of the accrual.
    Reconciled,
    /// Period closed.
    Closed,
    /// Offset by a reversing accrual.
    Reversed,
}

impl AccrualStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Posted => "posted",
            Self::Adjusted => "adjusted",
            Self::Reconciled => "reconciled",
            Self::Closed => "closed",
            Self::Reversed => "reversed",
        }
    }

    /// Statuses whose actuals are refreshed from invoices.
    pub const TRACKED: [Self; 4] = [Self::Draft, Self::Posted, Self::Adjusted, Self::Reconciled];
}

impl std::fmt::Display for AccrualStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes a signed variance percent of `actual` against `accrual`.
///
/// A zero accrual yields 0 when actual is also zero, otherwise +/-100.
#[must_use]
pub fn variance_percent(accrual: Decimal, actual: Decimal) -> Decimal {
    let variance = actual - accrual;
    if accrual.is_zero() {
        return match variance.cmp(&Decimal::ZERO) {
            std::cmp::Ordering::Greater => Decimal::ONE_HUNDRED,
            std::cmp::Ordering::Less => -Decimal::ONE_HUNDRED,
            std::cmp::Ordering::Equal => Decimal::ZERO,
        };
    }
    (variance / accrual.abs() * Decimal::ONE_HUNDRED).round_dp(2)
}

/// One GL line of an accrual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualLine {
    /// Line number.
    pub line_number: u32,
    /// GL account.
    pub gl_account: String,
    /// Cost center.
    #[serde(default)]
    pub cost_center: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Accrued amount.
    pub accrual_amount: Decimal,
    /// Actual amount attributed to the line.
    #[serde(default)]
    pub actual_amount: Decimal,
    /// Derived: `actual_amount - accrual_amount`.
    #[serde(default)]
    pub variance: Decimal,
    /// Derived variance percent.
    #[serde(default)]
    pub variance_percent: Decimal,
}

impl AccrualLine {
    /// Creates a line with no actuals.
    #[must_use]
    pub fn new(line_number: u32, gl_account: impl Into<String>, accrual_amount: Decimal) -> Self {
        Self {
            line_number,
            gl_account: gl_account.into(),
            cost_center: None,
            description: None,
            accrual_amount,
            actual_amount: Decimal::ZERO,
            variance: -accrual_amount,
            variance_percent: variance_percent(accrual_amount, Decimal::ZERO),
        }
    }
}

/// Manual adjustment entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualAdjustment {
    /// Signed amount added to the first line.
    pub amount: Decimal,
    /// Reason.
    pub reason: String,
    /// Who adjusted.
    #[serde(default)]
    pub adjusted_by: Option<UserId>,
    /// When.
    pub adjusted_at: DateTime<Utc>,
}

/// Derived accrual totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualTotals {
    /// Sum of line accruals.
    pub total_accrual: Decimal,
    /// Sum of line actuals.
    pub total_actual: Decimal,
    /// `total_actual - total_accrual`.
    pub total_variance: Decimal,
    /// Variance percent of the totals.
    pub variance_percent: Decimal,
}

/// Agreement an accrual was calculated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendSource {
    /// Spend kind.
    pub kind: SpendKind,
    /// Agreement reference.
    pub agreement: DocRef<SpendAgreementId>,
}

/// An accrual for one customer and period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accrual {
    /// Accrual ID.
    pub id: AccrualId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Accrual number.
    pub number: String,
    /// Accounting period.
    pub period: AccrualPeriod,
    /// Kind.
    pub accrual_type: AccrualType,
    /// Customer.
    pub customer_id: CustomerId,
    /// Source agreement.
    #[serde(default)]
    pub source: Option<SpendSource>,
    /// Currency.
    pub currency: Currency,
    /// Lifecycle status.
    pub status: AccrualStatus,
    /// GL lines.
    pub lines: Vec<AccrualLine>,
    /// Derived totals.
    #[serde(default)]
    pub totals: AccrualTotals,
    /// Absolute variance percent below which the accrual reconciles.
    pub reconcile_threshold_percent: Decimal,
    /// Set when actuals drift past the review threshold.
    #[serde(default)]
    pub needs_review: bool,
    /// Manual adjustments.
    #[serde(default)]
    pub adjustments: Vec<AccrualAdjustment>,
    /// Accrual this one reverses.
    #[serde(default)]
    pub reversal_of: Option<DocRef<AccrualId>>,
    /// Accrual that reversed this one.
    #[serde(default)]
    pub reversed_by: Option<DocRef<AccrualId>>,
    /// Approval chain and history.
    #[serde(default)]
    pub approval: ApprovalState,
    /// When the accrual was posted.
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    /// When actuals were last refreshed.
    #[serde(default)]
    pub actuals_updated_at: Option<DateTime<Utc>>,
    /// When the period was closed.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Accrual {
    /// Creates a draft accrual.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: OrganizationId,
        number: impl Into<String>,
        period: AccrualPeriod,
        accrual_type: AccrualType,
        customer_id: CustomerId,
        currency: Currency,
        lines: Vec<AccrualLine>,
        reconcile_threshold_percent: Decimal,
    ) -> Self {
        let mut accrual = Self {
            id: AccrualId::new(),
            organization_id,
            number: number.into(),
            period,
            accrual_type,
            customer_id,
            source: None,
            currency,
            status: AccrualStatus::Draft,
            lines,
            totals: AccrualTotals::default(),
            reconcile_threshold_percent,
            needs_review: false,
            adjustments: Vec::new(),
            reversal_of: None,
            reversed_by: None,
            approval: ApprovalState::default(),
            posted_at: None,
            actuals_updated_at: None,
            closed_at: None,
        };
        accrual.recompute_totals();
        accrual
    }

    /// Returns a reference to this accrual.
    #[must_use]
    pub fn doc_ref(&self) -> DocRef<AccrualId> {
        DocRef::new(self.id, self.number.clone())
    }

    /// Returns true if the absolute variance is under the reconcile threshold.
    #[must_use]
    pub fn within_tolerance(&self) -> bool {
        self.totals.variance_percent.abs() < self.reconcile_threshold_percent
    }

    /// Posts a draft accrual.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` unless draft.
    pub fn post(&mut self, at: DateTime<Utc>) -> Result<(), DocumentError> {
        if self.status != AccrualStatus::Draft {
            return Err(DocumentError::transition("accrual", self.status, AccrualStatus::Posted));
        }
        self.status = AccrualStatus::Posted;
        self.posted_at = Some(at);
        Ok(())
    }

    /// Adds a signed adjustment to the first line.
    ///
    /// # Errors
    ///
    /// Returns an error outside draft, posted or adjusted, or if the
    /// accrual has no lines.
    pub fn adjust(
        &mut self,
        amount: Decimal,
        reason: impl Into<String>,
        adjusted_by: Option<UserId>,
        at: DateTime<Utc>,
    ) -> Result<(), DocumentError> {
        if !matches!(
            self.status,
            AccrualStatus::Draft | AccrualStatus::Posted | AccrualStatus::Adjusted
        ) {
            return Err(DocumentError::transition(
                "accrual",
                self.status,
                AccrualStatus::Adjusted,
            ));
        }
        let line = self
            .lines
            .first_mut()
            .ok_or(DocumentError::LineNotFound { line_number: 1 })?;
        line.accrual_amount += amount;
        self.adjustments.push(AccrualAdjustment {
            amount,
            reason: reason.into(),
            adjusted_by,
            adjusted_at: at,
        });
        if self.status == AccrualStatus::Posted {
            self.status = AccrualStatus::Adjusted;
        }
        Ok(())
    }

    /// Closes a reconciled accrual.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` unless reconciled.
    pub fn close(&mut self, at: DateTime<Utc>) -> Result<(), DocumentError> {
        if self.status != AccrualStatus::Reconciled {
            return Err(DocumentError::transition("accrual", self.status, AccrualStatus::Closed));
        }
        self.status = AccrualStatus::Closed;
        self.closed_at = Some(at);
        Ok(())
    }

    /// Marks the accrual reversed by `reversal`.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::InvalidTransition` for draft, closed or
    /// already reversed accruals.
    pub fn mark_reversed(&mut self, reversal: DocRef<AccrualId>) -> Result<(), DocumentError> {
        if !self.is_reversible() {
            return Err(DocumentError::transition("accrual", self.status, AccrualStatus::Reversed));
        }
        self.status = AccrualStatus::Reversed;
        self.reversed_by = Some(reversal);
        self.needs_review = false;
        Ok(())
    }

    /// Returns true if the accrual may be reversed.
    #[must_use]
    pub const fn is_reversible(&self) -> bool {
        matches!(
            self.status,
            AccrualStatus::Posted | AccrualStatus::Adjusted | AccrualStatus::Reconciled
        )
    }

    /// Builds the sign-flipped reversing accrual, already posted.
    #[must_use]
    pub fn reversing_entry(&self, at: DateTime<Utc>) -> Self {
        let lines = self
            .lines
            .iter()
            .map(|line| {
                let mut reversed = line.clone();
                reversed.accrual_amount = -line.accrual_amount;
                reversed.actual_amount = -line.actual_amount;
                reversed
            })
            .collect();
        let mut reversal = Self::new(
            self.organization_id,
            format!("{}-REV", self.number),
            self.period,
            self.accrual_type,
            self.customer_id,
            self.currency,
            lines,
            self.reconcile_threshold_percent,
        );
        reversal.source = self.source.clone();
        reversal.reversal_of = Some(self.doc_ref());
        reversal.status = AccrualStatus::Posted;
        reversal.posted_at = Some(at);
        reversal
    }

    fn recompute_totals(&mut self) {
        for line in &mut self.lines {
            line.variance = line.actual_amount - line.accrual_amount;
            line.variance_percent = variance_percent(line.accrual_amount, line.actual_amount);
        }
        let total_accrual: Decimal = self.lines.iter().map(|l| l.accrual_amount).sum();
        let total_actual: Decimal = self.lines.iter().map(|l| l.actual_amount).sum();
        self.totals = AccrualTotals {
            total_accrual,
            total_actual,
            total_variance: total_actual - total_accrual,
            variance_percent: variance_percent(total_accrual, total_actual),
        };
    }
}

/// Filter for accrual queries.
#[derive(Debug, Clone, Default)]
pub struct AccrualFilter {
    /// Restrict to one customer.
    pub customer_id: Option<CustomerId>,
    /// Restrict to one period.
    pub period: Option<AccrualPeriod>,
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<AccrualStatus>,
    /// Restrict to accruals calculated from this agreement.
    pub source_id: Option<SpendAgreementId>,
    /// Restrict to reversals of this accrual.
    pub reversal_of: Option<AccrualId>,
}

impl Document for Accrual {
    type Id = AccrualId;
    type Filter = AccrualFilter;

    const KIND: DocumentKind = DocumentKind::Accrual;

    fn id(&self) -> AccrualId {
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
        self.period.start_date()
    }

    fn recompute_derived(mut self, _today: NaiveDate) -> Self {
        self.recompute_totals();
        if matches!(
            self.status,
            AccrualStatus::Posted | AccrualStatus::Adjusted | AccrualStatus::Reconciled
        ) {
            if self.within_tolerance() {
                self.status = AccrualStatus::Reconciled;
                self.needs_review = false;
            } else if self.status == AccrualStatus::Reconciled {
                self.status = AccrualStatus::Posted;
            }
        }
        self
    }

    fn check_invariants(&self) -> Result<(), DocumentError> {
        if self.period.quarter != (self.period.month - 1) / 3 + 1 {
            return Err(DocumentError::InvariantViolation(format!(
                "accrual {} quarter does not match its month",
                self.number
            )));
        }
        if self.status == AccrualStatus::Reversed && self.reversed_by.is_none() {
            return Err(DocumentError::InvariantViolation(format!(
                "accrual {} is reversed without a reversing entry",
                self.number
            )));
        }
        Ok(())
    }

    fn matches(&self, filter: &AccrualFilter) -> bool {
        filter.customer_id.is_none_or(|c| c == self.customer_id)
            && filter.period.is_none_or(|p| p == self.period)
            && status_allowed(&filter.statuses, &self.status)
            && filter
                .source_id
                .is_none_or(|id| self.source.as_ref().is_some_and(|s| s.agreement.id == id))
            && filter
                .reversal_of
                .is_none_or(|id| self.reversal_of.as_ref().is_some_and(|r| r.id == id))
    }

    fn filter_customer(filter: &AccrualFilter) -> Option<CustomerId> {
        filter.customer_id
    }
}

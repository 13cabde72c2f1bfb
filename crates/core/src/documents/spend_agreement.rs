//! Trade spend and promotion agreements that accruals are calculated from.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{Currency, CustomerId, OrganizationId, SpendAgreementId};

use super::{DocRef, Document, DocumentError, DocumentKind};

/// Kind of spend an agreement represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendKind {
    /// Ongoing trade spend program.
    TradeSpend,
    /// Time-boxed promotion.
    Promotion,
}

/// How the accrual amount is calculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    /// `base_amount * percentage / 100`.
    Percentage,
    /// `fixed_amount`.
    FixedAmount,
    /// `volume * rate_per_unit`.
    PerUnit,
    /// `volume * rate` of the tier containing the volume.
    Tiered,
}

/// One volume tier. `max_volume = None` leaves the tier open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTier {
    /// Lowest volume in the tier (inclusive).
    pub min_volume: Decimal,
    /// Highest volume in the tier (inclusive).
    #[serde(default)]
    pub max_volume: Option<Decimal>,
    /// Rate per unit for volumes in the tier.
    pub rate: Decimal,
}

impl VolumeTier {
    /// Returns true if the volume falls in this tier.
    #[must_use]
    pub fn contains(&self, volume: Decimal) -> bool {
        volume >= self.min_volume && self.max_volume.is_none_or(|max| volume <= max)
    }

    fn overlaps(&self, other: &Self) -> bool {
        let self_below_other = self.max_volume.is_some_and(|max| max < other.min_volume);
        let other_below_self = other.max_volume.is_some_and(|max| max < self.min_volume);
        !self_below_other && !other_below_self
    }
}

/// A trade spend or promotion agreement with a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendAgreement {
    /// Agreement ID.
    pub id: SpendAgreementId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Agreement number.
    pub number: String,
    /// Display name.
    pub name: String,
    /// Spend kind.
    pub kind: SpendKind,
    /// Customer the agreement is with.
    pub customer_id: CustomerId,
    /// Currency.
    pub currency: Currency,
    /// Calculation method.
    pub calculation_method: CalculationMethod,
    /// Base amount for percentage calculations.
    #[serde(default)]
    pub base_amount: Decimal,
    /// Percentage for percentage calculations.
    #[serde(default)]
    pub percentage: Decimal,
    /// Amount for fixed calculations.
    #[serde(default)]
    pub fixed_amount: Decimal,
    /// Volume for per-unit and tiered calculations.
    #[serde(default)]
    pub volume: Decimal,
    /// Rate for per-unit calculations.
    #[serde(default)]
    pub rate_per_unit: Decimal,
    /// Tiers for tiered calculations.
    #[serde(default)]
    pub tiers: Vec<VolumeTier>,
    /// GL account the accrual is booked to.
    pub gl_account: String,
    /// Cost center, if any.
    #[serde(default)]
    pub cost_center: Option<String>,
    /// First day the agreement applies.
    pub start_date: NaiveDate,
    /// Last day the agreement applies.
    pub end_date: NaiveDate,
    /// Inactive agreements are not accrued.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl SpendAgreement {
    /// Returns a reference to this agreement.
    #[must_use]
    pub fn doc_ref(&self) -> DocRef<SpendAgreementId> {
        DocRef::new(self.id, self.number.clone())
    }

    /// Returns true if the agreement is active on any day of the range.
    #[must_use]
    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.active && self.start_date <= end && self.end_date >= start
    }

    /// Checks that no two tiers overlap.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Validation` naming the first overlapping pair.
    pub fn validate_tiers(&self) -> Result<(), DocumentError> {
        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.max_volume.is_some_and(|max| max < tier.min_volume) {
                return Err(DocumentError::Validation(format!(
                    "Tier {} has max volume below min volume",
                    i + 1
                )));
            }
            for (j, other) in self.tiers.iter().enumerate().skip(i + 1) {
                if tier.overlaps(other) {
                    return Err(DocumentError::Validation(format!(
                        "Tiers {} and {} overlap",
                        i + 1,
                        j + 1
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Filter for spend agreement queries.
#[derive(Debug, Clone, Default)]
pub struct SpendAgreementFilter {
    /// Restrict to one customer.
    pub customer_id: Option<CustomerId>,
    /// Only active agreements.
    pub active_only: bool,
}

impl Document for SpendAgreement {
    type Id = SpendAgreementId;
    type Filter = SpendAgreementFilter;

    const KIND: DocumentKind = DocumentKind::SpendAgreement;

    fn id(&self) -> SpendAgreementId {
        self.id
    }

    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    fn customer_id(&self) -> Option<CustomerId> {
        Some(self.customer_id)
    }

    fn status_label(&self) -> &'static str {
        if self.active { "active" } else { "inactive" }
    }

    fn document_date(&self) -> NaiveDate {
        self.start_date
    }

    fn recompute_derived(self, _today: NaiveDate) -> Self {
        self
    }

    fn check_invariants(&self) -> Result<(), DocumentError> {
        if self.end_date < self.start_date {
            return Err(DocumentError::InvariantViolation(format!(
                "spend agreement {} ends before it starts",
                self.number
            )));
        }
        self.validate_tiers()
            .map_err(|e| DocumentError::InvariantViolation(e.to_string()))
    }

    fn matches(&self, filter: &SpendAgreementFilter) -> bool {
        filter.customer_id.is_none_or(|c| c == self.customer_id) && (!filter.active_only || self.active)
    }

    fn filter_customer(filter: &SpendAgreementFilter) -> Option<CustomerId> {
        filter.customer_id
    }
}

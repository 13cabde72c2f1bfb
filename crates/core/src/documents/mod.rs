//! Ledger entities: purchase orders, invoices, payments, deductions,
//! settlements, accruals and the spend agreements accruals are computed from.
//!
//! Every entity implements [`Document`]. Stores call
//! [`Document::recompute_derived`] and [`Document::check_invariants`]
//! immediately before persisting, so derived totals and statuses are never
//! trusted from a previous in-memory copy.

pub mod accrual;
pub mod deduction;
pub mod error;
pub mod invoice;
pub mod payment;
pub mod period;
pub mod purchase_order;
pub mod settlement;
pub mod spend_agreement;
pub mod totals;

#[cfg(test)]
mod totals_props;

use std::fmt::{Debug, Display};
use std::hash::Hash;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tally_shared::types::{CustomerId, OrganizationId};
use uuid::Uuid;

pub use accrual::{
    Accrual, AccrualAdjustment, AccrualFilter, AccrualLine, AccrualStatus, AccrualTotals,
    AccrualType, SpendSource, variance_percent,
};
pub use deduction::{Deduction, DeductionFilter, DeductionStatus};
pub use error::DocumentError;
pub use invoice::{
    Invoice, InvoiceFilter, InvoiceLine, InvoiceStatus, MatchStatus, PaymentReceipt,
};
pub use payment::{
    Payment, PaymentApplication, PaymentDeduction, PaymentFilter, PaymentMatchStatus,
    PaymentMethod, PaymentStatus,
};
pub use period::AccrualPeriod;
pub use purchase_order::{
    InvoiceAllocation, PurchaseOrder, PurchaseOrderFilter, PurchaseOrderLine,
    PurchaseOrderLineStatus, PurchaseOrderStatus,
};
pub use settlement::{
    BankReconciliation, Settlement, SettlementFilter, SettlementItem, SettlementItemType,
    SettlementPeriod, SettlementStamp, SettlementStatus, SettlementTotals,
};
pub use spend_agreement::{
    CalculationMethod, SpendAgreement, SpendAgreementFilter, SpendKind, VolumeTier,
};
pub use totals::{DocumentTotals, PricedLine};

/// Kinds of persisted documents, used as the storage discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Purchase order.
    PurchaseOrder,
    /// Invoice.
    Invoice,
    /// Payment.
    Payment,
    /// Customer deduction.
    Deduction,
    /// Settlement.
    Settlement,
    /// Accrual.
    Accrual,
    /// Trade spend or promotion agreement.
    SpendAgreement,
}

impl DocumentKind {
    /// Returns the string representation of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseOrder => "purchase_order",
            Self::Invoice => "invoice",
            Self::Payment => "payment",
            Self::Deduction => "deduction",
            Self::Settlement => "settlement",
            Self::Accrual => "accrual",
            Self::SpendAgreement => "spend_agreement",
        }
    }
}

impl Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted, tenant-scoped entity with derived state.
pub trait Document: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Typed identifier.
    type Id: Copy + Eq + Hash + Debug + Display + Into<Uuid> + Send + Sync + 'static;
    /// Query filter accepted by repositories.
    type Filter: Default + Debug + Send + Sync;

    /// Storage discriminator.
    const KIND: DocumentKind;

    /// Returns the document ID.
    fn id(&self) -> Self::Id;

    /// Returns the owning organization.
    fn organization_id(&self) -> OrganizationId;

    /// Returns the customer this document belongs to, if any.
    fn customer_id(&self) -> Option<CustomerId>;

    /// Returns the status as stored (snake_case).
    fn status_label(&self) -> &'static str;

    /// Business date used for ordering and date-window queries.
    fn document_date(&self) -> NaiveDate;

    /// Recomputes every derived field from the current data.
    ///
    /// Must be pure: the result depends only on `self` and `today`.
    #[must_use]
    fn recompute_derived(self, today: NaiveDate) -> Self;

    /// Checks invariants that must hold before the document is persisted.
    fn check_invariants(&self) -> Result<(), DocumentError>;

    /// Returns true if the document satisfies the filter.
    fn matches(&self, filter: &Self::Filter) -> bool;

    /// Customer constraint of a filter, used by stores to narrow queries.
    fn filter_customer(filter: &Self::Filter) -> Option<CustomerId>;
}

/// Weak reference to another document: ID plus denormalized number.
///
/// Used for lookup only, never for cascading deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRef<I> {
    /// Referenced document ID.
    pub id: I,
    /// Referenced document number.
    pub number: String,
}

impl<I> DocRef<I> {
    /// Creates a new reference.
    pub fn new(id: I, number: impl Into<String>) -> Self {
        Self {
            id,
            number: number.into(),
        }
    }
}

/// Builds a human-readable document number from a prefix and an ID.
///
/// Uses the random tail of the UUID so numbers minted in the same
/// millisecond stay distinct.
#[must_use]
pub fn document_number(prefix: &str, id: Uuid) -> String {
    let simple = id.simple().to_string();
    format!("{prefix}-{}", simple[20..].to_uppercase())
}

/// Returns true if `statuses` is empty or contains `status`.
pub(crate) fn status_allowed<S: PartialEq>(statuses: &[S], status: &S) -> bool {
    statuses.is_empty() || statuses.contains(status)
}

/// Returns true if `date` lies within the optional inclusive bounds.
pub(crate) fn date_in_range(date: NaiveDate, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    from.is_none_or(|from| date >= from) && to.is_none_or(|to| date <= to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_number_uses_random_tail() {
        let id = Uuid::parse_str("0190f3a2-7c4e-7b1d-9a3f-5e6d7c8b9a01").unwrap();
        assert_eq!(document_number("INV", id), "INV-5E6D7C8B9A01");
    }

    #[test]
    fn test_date_in_range() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        assert!(date_in_range(d, Some(start), Some(end)));
        assert!(date_in_range(d, None, None));
        assert!(date_in_range(start, Some(start), Some(end)));
        assert!(!date_in_range(d, Some(end), None));
    }

    #[test]
    fn test_status_allowed() {
        assert!(status_allowed::<u8>(&[], &3));
        assert!(status_allowed(&[1, 2, 3], &3));
        assert!(!status_allowed(&[1, 2], &3));
    }
}

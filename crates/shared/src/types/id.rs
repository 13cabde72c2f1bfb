//! Typed IDs for type-safe entity references.
//!
//! Using typed IDs prevents accidentally passing an `InvoiceId` where a
//! `PurchaseOrderId` is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to generate typed ID wrappers.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random ID using UUID v7 (time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

typed_id!(UserId, "Unique identifier for a user (approver, auditor actor).");
typed_id!(OrganizationId, "Unique identifier for an organization (tenant).");
typed_id!(CustomerId, "Unique identifier for a customer.");
typed_id!(VendorId, "Unique identifier for a vendor.");
typed_id!(ProductId, "Unique identifier for a product.");
typed_id!(PurchaseOrderId, "Unique identifier for a purchase order.");
typed_id!(InvoiceId, "Unique identifier for an invoice.");
typed_id!(PaymentId, "Unique identifier for a payment.");
typed_id!(DeductionId, "Unique identifier for a customer deduction.");
typed_id!(SettlementId, "Unique identifier for a settlement.");
typed_id!(AccrualId, "Unique identifier for an accrual.");
typed_id!(
    SpendAgreementId,
    "Unique identifier for a trade spend or promotion agreement."
);

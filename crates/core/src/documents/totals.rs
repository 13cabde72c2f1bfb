//! Line totals shared by purchase orders and invoices.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A priced document line.
pub trait PricedLine {
    /// Ordered or billed quantity.
    fn quantity(&self) -> Decimal;
    /// Price per unit.
    fn unit_price(&self) -> Decimal;
    /// Tax charged on the line.
    fn tax(&self) -> Decimal;
    /// Discount granted on the line.
    fn discount(&self) -> Decimal;

    /// Extended amount: `quantity * unit_price`.
    fn extended_amount(&self) -> Decimal {
        self.quantity() * self.unit_price()
    }
}

/// Header totals derived from a document's lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTotals {
    /// Sum of line amounts.
    pub subtotal: Decimal,
    /// Sum of line discounts.
    pub discount_total: Decimal,
    /// Sum of line taxes.
    pub tax_total: Decimal,
    /// `subtotal - discount_total + tax_total`.
    pub total: Decimal,
}

impl DocumentTotals {
    /// Computes totals from lines.
    pub fn from_lines<'a, L>(lines: impl IntoIterator<Item = &'a L>) -> Self
    where
        L: PricedLine + 'a,
    {
        let (subtotal, discount_total, tax_total) = lines.into_iter().fold(
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            |(subtotal, discount, tax), line| {
                (
                    subtotal + line.extended_amount(),
                    discount + line.discount(),
                    tax + line.tax(),
                )
            },
        );

        Self {
            subtotal,
            discount_total,
            tax_total,
            total: subtotal - discount_total + tax_total,
        }
    }

    /// Returns true if the stored total agrees with its components.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.total == self.subtotal - self.discount_total + self.tax_total
    }
}

//! Property tests for derived document totals.

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::types::{Currency, CustomerId, InvoiceId, OrganizationId, ProductId};

use super::{
    DocRef, Document, Invoice, InvoiceLine, InvoiceStatus, Payment, PaymentStatus,
};

fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn line_strategy() -> impl Strategy<Value = (i64, Decimal, Decimal, Decimal)> {
    (1i64..500, amount_strategy(), 0i64..5_000, 0i64..5_000)
        .prop_map(|(qty, price, tax, discount)| (qty, price, Decimal::new(tax, 2), Decimal::new(discount, 2)))
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap_or_default()
}

proptest! {
    #[test]
    fn prop_invoice_total_identity(lines in prop::collection::vec(line_strategy(), 0..8)) {
        let lines = lines
            .into_iter()
            .enumerate()
            .map(|(i, (qty, price, tax, discount))| {
                let mut line = InvoiceLine::new(
                    u32::try_from(i + 1).unwrap_or(u32::MAX),
                    ProductId::new(),
                    Decimal::from(qty),
                    price,
                );
                line.tax = tax;
                line.discount = discount;
                line
            })
            .collect::<Vec<_>>();
        let invoice = Invoice::new(
            OrganizationId::new(),
            "INV-P",
            CustomerId::new(),
            date(),
            date(),
            Currency::Usd,
            lines,
        )
        .recompute_derived(date());

        let amounts: Decimal = invoice.lines.iter().map(|l| l.amount).sum();
        prop_assert_eq!(invoice.totals.subtotal, amounts);
        prop_assert_eq!(
            invoice.totals.total,
            invoice.totals.subtotal - invoice.totals.discount_total + invoice.totals.tax_total
        );
        prop_assert_eq!(invoice.outstanding_amount, invoice.totals.total);
    }

    #[test]
    fn prop_invoice_paid_plus_outstanding_is_total(
        price in amount_strategy(),
        paid_share in 0u32..=100,
    ) {
        let mut invoice = Invoice::new(
            OrganizationId::new(),
            "INV-P",
            CustomerId::new(),
            date(),
            date(),
            Currency::Usd,
            vec![InvoiceLine::new(1, ProductId::new(), Decimal::ONE, price)],
        );
        invoice.status = InvoiceStatus::Approved;
        let paid = (price * Decimal::from(paid_share) / Decimal::ONE_HUNDRED).round_dp(2);
        invoice.upsert_receipt(DocRef::new(tally_shared::types::PaymentId::new(), "PAY-P"), paid, date());
        let invoice = invoice.recompute_derived(date());

        prop_assert_eq!(invoice.amount_paid + invoice.outstanding_amount, invoice.totals.total);
        prop_assert!(invoice.check_invariants().is_ok());
        if paid >= price {
            prop_assert_eq!(invoice.status, InvoiceStatus::Paid);
        }
    }

    #[test]
    fn prop_payment_balance_identity(
        amount in amount_strategy(),
        applications in prop::collection::vec(1u32..=100, 0..6),
    ) {
        let mut payment = Payment::new(
            OrganizationId::new(),
            "PAY-P",
            CustomerId::new(),
            date(),
            amount,
            Currency::Usd,
        );
        payment.status = PaymentStatus::Cleared;
        for share in applications {
            let requested = (amount * Decimal::from(share) / Decimal::ONE_HUNDRED).round_dp(2);
            let invoice = DocRef::new(InvoiceId::new(), "INV-P");
            // Over-draws are rejected and leave the payment untouched.
            let _ = payment.apply(invoice, requested, date());
        }
        let payment = payment.recompute_derived(date());

        prop_assert_eq!(
            payment.applied_amount + payment.deduction_amount + payment.unapplied_amount,
            payment.amount
        );
        prop_assert!(payment.unapplied_amount >= Decimal::ZERO);
        prop_assert!(payment.check_invariants().is_ok());
    }
}

//! Property tests for settlement netting and GL postings.

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::config::GlAccountConfig;
use tally_shared::types::{Currency, CustomerId, OrganizationId};
use uuid::Uuid;

use super::posting::build_posting;
use crate::documents::{Document, Settlement, SettlementItem, SettlementItemType, SettlementPeriod};

fn cents() -> impl Strategy<Value = Decimal> {
    (0i64..=5_000_000).prop_map(|c| Decimal::new(c, 2))
}

fn signed_cents() -> impl Strategy<Value = Decimal> {
    (-500_000i64..=500_000).prop_map(|c| Decimal::new(c, 2))
}

fn item_type() -> impl Strategy<Value = SettlementItemType> {
    prop_oneof![
        Just(SettlementItemType::Invoice),
        Just(SettlementItemType::Payment),
        Just(SettlementItemType::Deduction),
        Just(SettlementItemType::CreditMemo),
        Just(SettlementItemType::DebitMemo),
    ]
}

fn items() -> impl Strategy<Value = Vec<SettlementItem>> {
    let document = (item_type(), cents())
        .prop_map(|(t, amount)| SettlementItem::new(t, Uuid::now_v7(), "REF", amount));
    let adjustment = signed_cents()
        .prop_map(|amount| SettlementItem::new(SettlementItemType::Adjustment, Uuid::now_v7(), "ADJ", amount));
    prop::collection::vec(prop_oneof![4 => document, 1 => adjustment], 1..12)
}

fn settlement(items: Vec<SettlementItem>) -> Settlement {
    let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
    Settlement::new(
        OrganizationId::new(),
        "STL-P",
        CustomerId::new(),
        end,
        SettlementPeriod { start, end },
        Currency::Usd,
        items,
    )
    .recompute_derived(end)
}

proptest! {
    #[test]
    fn net_is_invoices_less_payments_less_deductions_plus_adjustments(items in items()) {
        let s = settlement(items);
        let t = s.totals;
        prop_assert_eq!(
            t.net_settlement,
            t.total_invoices - t.total_payments - t.total_deductions + t.total_adjustments
        );
    }

    #[test]
    fn posting_always_balances(items in items()) {
        let s = settlement(items);
        let has_amount = s.items.iter().any(|i| !i.amount.is_zero());
        match build_posting(&s, &GlAccountConfig::default()) {
            Ok(posting) => prop_assert_eq!(posting.total_debits(), posting.total_credits()),
            // Only an all-zero settlement yields no lines.
            Err(_) => prop_assert!(!has_amount),
        }
    }
}

//! Property tests for match scoring.

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::config::MatchingConfig;
use tally_shared::types::{Currency, CustomerId, OrganizationId, ProductId};

use super::scoring::{evaluate_match, line_confidence, variance_ratio};
use crate::documents::{Invoice, InvoiceLine, PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus};

fn cents() -> impl Strategy<Value = Decimal> {
    (1i64..=1_000_000).prop_map(|c| Decimal::new(c, 2))
}

fn ratio() -> impl Strategy<Value = Decimal> {
    (0i64..=10_000).prop_map(|bp| Decimal::new(bp, 4))
}

fn pair(quantity: Decimal, po_price: Decimal, invoice_price: Decimal) -> (Invoice, PurchaseOrder) {
    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let product = ProductId::new();
    let mut po = PurchaseOrder::new(
        OrganizationId::new(),
        "PO-P",
        CustomerId::new(),
        date,
        Currency::Usd,
        vec![PurchaseOrderLine::new(1, product, quantity, po_price)],
    );
    po.status = PurchaseOrderStatus::Approved;
    let invoice = Invoice::new(
        po.organization_id,
        "INV-P",
        po.customer_id,
        date,
        date,
        Currency::Usd,
        vec![InvoiceLine::new(1, product, quantity, invoice_price)],
    );
    (invoice, po)
}

proptest! {
    #[test]
    fn prop_line_confidence_is_bounded(pv in ratio(), qv in ratio()) {
        let confidence = line_confidence(pv, qv);
        prop_assert!(confidence >= Decimal::ZERO);
        prop_assert!(confidence <= Decimal::ONE_HUNDRED);
    }

    #[test]
    fn prop_line_confidence_decreases_with_variance(pv in ratio(), qv in ratio(), extra in ratio()) {
        prop_assert!(line_confidence(pv + extra, qv) <= line_confidence(pv, qv));
    }

    #[test]
    fn prop_variance_ratio_is_non_negative(a in cents(), b in cents()) {
        prop_assert!(variance_ratio(a, b) >= Decimal::ZERO);
        prop_assert_eq!(variance_ratio(b, b), Decimal::ZERO);
    }

    #[test]
    fn prop_identical_documents_match_fully(quantity in 1i64..1000, price in cents()) {
        let quantity = Decimal::from(quantity);
        let (invoice, po) = pair(quantity, price, price);
        let result = evaluate_match(&invoice, &po, &MatchingConfig::default()).unwrap();
        prop_assert!(result.matched);
        prop_assert_eq!(result.confidence, Decimal::ONE_HUNDRED);
    }

    #[test]
    fn prop_matched_implies_threshold(quantity in 1i64..1000, po_price in cents(), invoice_price in cents()) {
        let (invoice, po) = pair(Decimal::from(quantity), po_price, invoice_price);
        let config = MatchingConfig::default();
        let result = evaluate_match(&invoice, &po, &config).unwrap();
        if result.matched {
            prop_assert!(result.confidence >= config.auto_match_confidence);
            prop_assert!(result.exceptions.is_empty());
            for line in &result.line_matches {
                prop_assert!(line.price_variance <= config.price_tolerance);
            }
        }
    }
}

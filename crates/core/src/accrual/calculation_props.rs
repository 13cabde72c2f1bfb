//! Property tests for accrual calculation.

use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::types::Currency;

use super::calculation::distribute_evenly;
use crate::documents::variance_percent;

fn cents() -> impl Strategy<Value = Decimal> {
    (-10_000_000i64..=10_000_000).prop_map(|c| Decimal::new(c, 2))
}

proptest! {
    #[test]
    fn distribution_sums_exactly(total in cents(), parts in 1usize..=24) {
        let shares = distribute_evenly(total, parts, Currency::Usd);
        prop_assert_eq!(shares.len(), parts);
        prop_assert_eq!(shares.iter().copied().sum::<Decimal>(), total);
    }

    #[test]
    fn distribution_shares_differ_by_at_most_the_remainder(total in cents(), parts in 1usize..=24) {
        let shares = distribute_evenly(total, parts, Currency::Usd);
        let first = shares[0];
        for share in &shares[..parts - 1] {
            prop_assert_eq!(*share, first);
        }
        let tolerance = Decimal::new(1, 2) * Decimal::from(parts);
        prop_assert!((shares[parts - 1] - first).abs() <= tolerance);
    }

    #[test]
    fn variance_sign_follows_actual(accrual in cents(), actual in cents()) {
        let pct = variance_percent(accrual, actual);
        if actual > accrual {
            prop_assert!(pct >= Decimal::ZERO);
        } else if actual < accrual {
            prop_assert!(pct <= Decimal::ZERO);
        } else {
            prop_assert_eq!(pct, Decimal::ZERO);
        }
    }
}

//! Currency conversion and rounding.
//!
//! All conversions use banker's rounding (round half to even) so repeated
//! conversions do not drift in one direction.

use rust_decimal::{Decimal, RoundingStrategy};
use tally_shared::types::Currency;

/// Decimal places kept for amounts stored in the base currency.
pub const BASE_AMOUNT_DP: u32 = 4;

/// Converts an amount using the given exchange rate, rounded to `decimal_places`.
#[must_use]
pub fn convert_amount(amount: Decimal, rate: Decimal, decimal_places: u32) -> Decimal {
    let converted = amount * rate;
    converted.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointNearestEven)
}

/// Converts a document amount into the organization's base currency.
#[must_use]
pub fn to_base_amount(amount: Decimal, rate: Decimal) -> Decimal {
    convert_amount(amount, rate, BASE_AMOUNT_DP)
}

/// Converts an amount into `target`, rounded to its minor unit.
#[must_use]
pub fn convert_to(amount: Decimal, rate: Decimal, target: Currency) -> Decimal {
    convert_amount(amount, rate, target.minor_units())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_convert_to_zero_decimal_currency() {
        // 100.50 USD * 150.25 = 15100.125 JPY -> 15100
        assert_eq!(convert_to(dec!(100.50), dec!(150.25), Currency::Jpy), dec!(15100));
    }

    #[test]
    fn test_convert_to_two_decimal_currency() {
        assert_eq!(convert_to(dec!(1000), dec!(0.92345), Currency::Eur), dec!(923.45));
    }

    #[test]
    fn test_base_amount_keeps_four_places() {
        assert_eq!(to_base_amount(dec!(1234.56), dec!(1.08765)), dec!(1342.7692));
    }

    #[test]
    fn test_bankers_rounding() {
        assert_eq!(convert_amount(dec!(1), dec!(2.5), 0), dec!(2));
        assert_eq!(convert_amount(dec!(1), dec!(3.5), 0), dec!(4));
        assert_eq!(convert_amount(dec!(0.125), dec!(1), 2), dec!(0.12));
    }
}

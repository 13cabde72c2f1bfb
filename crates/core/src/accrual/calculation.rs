//! Accrual amount calculation and actual distribution.

use rust_decimal::Decimal;
use tally_shared::types::Currency;

use super::error::AccrualError;
use crate::documents::{AccrualLine, CalculationMethod, SpendAgreement};

/// Computes the accrual amount an agreement produces, rounded to the
/// agreement currency.
///
/// A tiered agreement whose volume is below every tier has not qualified
/// and accrues zero.
///
/// # Errors
///
/// Returns `AccrualError::Configuration` if tiers overlap, or if the
/// volume falls in a gap between tiers or above the last bounded tier.
pub fn calculate_amount(agreement: &SpendAgreement) -> Result<Decimal, AccrualError> {
    let amount = match agreement.calculation_method {
        CalculationMethod::Percentage => agreement.base_amount * agreement.percentage / Decimal::ONE_HUNDRED,
        CalculationMethod::FixedAmount => agreement.fixed_amount,
        CalculationMethod::PerUnit => agreement.volume * agreement.rate_per_unit,
        CalculationMethod::Tiered => {
            agreement
                .validate_tiers()
                .map_err(|e| AccrualError::Configuration(e.to_string()))?;
            let volume = agreement.volume;
            match agreement.tiers.iter().find(|tier| tier.contains(volume)) {
                Some(tier) => volume * tier.rate,
                None if agreement.tiers.iter().all(|tier| volume < tier.min_volume) => Decimal::ZERO,
                None => {
                    return Err(AccrualError::Configuration(format!(
                        "Volume {volume} of agreement {} falls in no tier",
                        agreement.number
                    )));
                }
            }
        }
    };
    Ok(agreement.currency.round(amount))
}

/// Builds the accrual lines for an agreement: one line on its GL account.
#[must_use]
pub fn agreement_lines(agreement: &SpendAgreement, amount: Decimal) -> Vec<AccrualLine> {
    let mut line = AccrualLine::new(1, agreement.gl_account.clone(), amount);
    line.cost_center.clone_from(&agreement.cost_center);
    line.description = Some(agreement.name.clone());
    vec![line]
}

/// Splits `total` into `parts` shares rounded to the currency; the last
/// share absorbs the rounding remainder so the shares sum to `total`.
#[must_use]
pub fn distribute_evenly(total: Decimal, parts: usize, currency: Currency) -> Vec<Decimal> {
    if parts == 0 {
        return Vec::new();
    }
    let share = currency.round(total / Decimal::from(parts));
    let mut shares = vec![share; parts - 1];
    let allocated: Decimal = shares.iter().copied().sum();
    shares.push(total - allocated);
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use tally_shared::types::{CustomerId, OrganizationId, SpendAgreementId};

    use crate::documents::{SpendKind, VolumeTier};

    fn agreement(method: CalculationMethod) -> SpendAgreement {
        SpendAgreement {
            id: SpendAgreementId::new(),
            organization_id: OrganizationId::new(),
            number: "TS-1".into(),
            name: "Spring display".into(),
            kind: SpendKind::TradeSpend,
            customer_id: CustomerId::new(),
            currency: Currency::Usd,
            calculation_method: method,
            base_amount: dec!(20000),
            percentage: dec!(5),
            fixed_amount: dec!(750),
            volume: dec!(1200),
            rate_per_unit: dec!(0.35),
            tiers: vec![
                VolumeTier {
                    min_volume: dec!(0),
                    max_volume: Some(dec!(999)),
                    rate: dec!(0.25),
                },
                VolumeTier {
                    min_volume: dec!(1000),
                    max_volume: None,
                    rate: dec!(0.40),
                },
            ],
            gl_account: "6100".into(),
            cost_center: Some("CC-EAST".into()),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            active: true,
        }
    }

    #[rstest]
    #[case(CalculationMethod::Percentage, dec!(1000))]
    #[case(CalculationMethod::FixedAmount, dec!(750))]
    #[case(CalculationMethod::PerUnit, dec!(420))]
    #[case(CalculationMethod::Tiered, dec!(480))]
    fn test_calculate_amount(#[case] method: CalculationMethod, #[case] expected: Decimal) {
        assert_eq!(calculate_amount(&agreement(method)).unwrap(), expected);
    }

    #[test]
    fn test_volume_between_tiers_is_a_configuration_error() {
        let mut a = agreement(CalculationMethod::Tiered);
        a.volume = dec!(999.5);
        assert!(matches!(calculate_amount(&a), Err(AccrualError::Configuration(_))));
    }

    #[test]
    fn test_volume_above_last_bounded_tier_is_a_configuration_error() {
        let mut a = agreement(CalculationMethod::Tiered);
        a.tiers[1].max_volume = Some(dec!(1100));
        assert!(matches!(calculate_amount(&a), Err(AccrualError::Configuration(_))));
    }

    #[test]
    fn test_volume_below_first_tier_accrues_zero() {
        let mut a = agreement(CalculationMethod::Tiered);
        a.tiers[0].min_volume = dec!(100);
        a.volume = dec!(40);
        assert_eq!(calculate_amount(&a).unwrap(), dec!(0));
    }

    #[test]
    fn test_overlapping_tiers_are_a_configuration_error() {
        let mut a = agreement(CalculationMethod::Tiered);
        a.tiers[0].max_volume = Some(dec!(1000));
        assert!(matches!(calculate_amount(&a), Err(AccrualError::Configuration(_))));
    }

    #[test]
    fn test_distribute_puts_remainder_on_last_line() {
        let shares = distribute_evenly(dec!(100), 3, Currency::Usd);
        assert_eq!(shares, vec![dec!(33.33), dec!(33.33), dec!(33.34)]);
        assert!(distribute_evenly(dec!(100), 0, Currency::Usd).is_empty());
    }

    #[test]
    fn test_agreement_lines_carry_gl_and_cost_center() {
        let lines = agreement_lines(&agreement(CalculationMethod::FixedAmount), dec!(750));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].gl_account, "6100");
        assert_eq!(lines[0].cost_center.as_deref(), Some("CC-EAST"));
        assert_eq!(lines[0].accrual_amount, dec!(750));
    }
}

//! Monthly accounting periods.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::DocumentError;

/// A calendar month used for accrual periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccrualPeriod {
    /// Calendar year.
    pub year: i32,
    /// Month (1-12).
    pub month: u32,
    /// Quarter (1-4), always `(month - 1) / 3 + 1`.
    pub quarter: u32,
}

impl AccrualPeriod {
    /// Creates a period for the given year and month.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::Validation` if the month is outside 1-12.
    pub fn new(year: i32, month: u32) -> Result<Self, DocumentError> {
        if !(1..=12).contains(&month) {
            return Err(DocumentError::Validation(format!(
                "Month must be between 1 and 12, got {month}"
            )));
        }
        Ok(Self {
            year,
            month,
            quarter: (month - 1) / 3 + 1,
        })
    }

    /// Returns the period containing the given date.
    #[must_use]
    pub fn containing(date: NaiveDate) -> Self {
        let month = date.month();
        Self {
            year: date.year(),
            month,
            quarter: (month - 1) / 3 + 1,
        }
    }

    /// First day of the period.
    #[must_use]
    pub fn start_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last day of the period.
    #[must_use]
    pub fn end_date(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|first| first.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// Returns true if the date falls inside the period.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl std::fmt::Display for AccrualPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1)]
    #[case(3, 1)]
    #[case(4, 2)]
    #[case(9, 3)]
    #[case(10, 4)]
    #[case(12, 4)]
    fn test_quarter_derivation(#[case] month: u32, #[case] quarter: u32) {
        assert_eq!(AccrualPeriod::new(2026, month).unwrap().quarter, quarter);
    }

    #[test]
    fn test_invalid_month_rejected() {
        assert!(AccrualPeriod::new(2026, 0).is_err());
        assert!(AccrualPeriod::new(2026, 13).is_err());
    }

    #[test]
    fn test_period_bounds() {
        let feb = AccrualPeriod::new(2028, 2).unwrap();
        assert_eq!(feb.start_date(), NaiveDate::from_ymd_opt(2028, 2, 1).unwrap());
        assert_eq!(feb.end_date(), NaiveDate::from_ymd_opt(2028, 2, 29).unwrap());

        let dec = AccrualPeriod::new(2026, 12).unwrap();
        assert_eq!(dec.end_date(), NaiveDate::from_ymd_opt(2026, 12, 31).unwrap());
        assert!(dec.contains(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()));
        assert!(!dec.contains(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()));
    }

    #[test]
    fn test_display_and_containing() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let period = AccrualPeriod::containing(date);
        assert_eq!(period, AccrualPeriod::new(2026, 3).unwrap());
        assert_eq!(period.to_string(), "2026-03");
    }
}

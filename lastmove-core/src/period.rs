//! Period model: recurrence period -> hours, using calendar approximations.

use crate::activity::FrequencyUnit;

const HOURS_PER_DAY: f64 = 24.0;

/// Hours in one unit. Months are 30 days, quarters 90, years 365.
pub fn unit_hours(unit: FrequencyUnit) -> f64 {
    match unit {
        FrequencyUnit::Days => HOURS_PER_DAY,
        FrequencyUnit::Weeks => HOURS_PER_DAY * 7.0,
        FrequencyUnit::Months => HOURS_PER_DAY * 30.0,
        FrequencyUnit::Quarters => HOURS_PER_DAY * 90.0,
        FrequencyUnit::Years => HOURS_PER_DAY * 365.0,
    }
}

pub fn period_hours(value: u32, unit: FrequencyUnit) -> f64 {
    f64::from(value) * unit_hours(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_conversions() {
        assert_eq!(period_hours(1, FrequencyUnit::Days), 24.0);
        assert_eq!(period_hours(1, FrequencyUnit::Weeks), 168.0);
        assert_eq!(period_hours(1, FrequencyUnit::Months), 720.0);
        assert_eq!(period_hours(1, FrequencyUnit::Quarters), 2160.0);
        assert_eq!(period_hours(1, FrequencyUnit::Years), 8760.0);
    }

    #[test]
    fn linear_in_value() {
        for unit in FrequencyUnit::ALL {
            let one = period_hours(1, unit);
            for value in [1u32, 2, 3, 7, 12, 52] {
                assert_eq!(period_hours(value, unit), f64::from(value) * one);
            }
        }
    }
}

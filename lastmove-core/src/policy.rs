//! Notification policy: per-unit urgency thresholds as plain data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::activity::FrequencyUnit;
use crate::notification::Priority;

/// One tier of a unit's policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Minimum urgency percent (inclusive).
    pub percent: f64,
    pub priority: Priority,
    pub message: String,
    /// Only fire when the local evaluation hour is at least this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_local_hour: Option<u32>,
}

impl Threshold {
    pub fn new(percent: f64, priority: Priority, message: impl Into<String>) -> Self {
        Self {
            percent,
            priority,
            message: message.into(),
            min_local_hour: None,
        }
    }

    pub fn with_min_local_hour(mut self, hour: u32) -> Self {
        self.min_local_hour = Some(hour);
        self
    }

    pub fn admits(&self, urgency: f64, local_hour: u32) -> bool {
        if urgency < self.percent {
            return false;
        }
        match self.min_local_hour {
            Some(min) => local_hour >= min,
            None => true,
        }
    }
}

/// Unit -> thresholds, each list kept sorted by percent, highest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<FrequencyUnit, Vec<Threshold>>",
    into = "BTreeMap<FrequencyUnit, Vec<Threshold>>"
)]
pub struct NotificationPolicy {
    units: BTreeMap<FrequencyUnit, Vec<Threshold>>,
}

impl NotificationPolicy {
    pub fn new(units: BTreeMap<FrequencyUnit, Vec<Threshold>>) -> Self {
        let mut units = units;
        for thresholds in units.values_mut() {
            thresholds.sort_by(|a, b| b.percent.total_cmp(&a.percent));
        }
        Self { units }
    }

    pub fn empty() -> Self {
        Self {
            units: BTreeMap::new(),
        }
    }

    pub fn with_unit(mut self, unit: FrequencyUnit, thresholds: Vec<Threshold>) -> Self {
        self.units.insert(unit, thresholds);
        Self::new(self.units)
    }

    pub fn thresholds(&self, unit: FrequencyUnit) -> Option<&[Threshold]> {
        self.units.get(&unit).map(Vec::as_slice)
    }

    pub fn units(&self) -> impl Iterator<Item = FrequencyUnit> + '_ {
        self.units.keys().copied()
    }

    /// The production table.
    pub fn reference() -> Self {
        let approaching = |period: &str| format!("Your {period} activity deadline is approaching.");
        let almost = |period: &str| format!("Your {period} activity is almost due.");

        let mut units = BTreeMap::new();
        units.insert(
            FrequencyUnit::Days,
            vec![
                Threshold::new(100.0, Priority::High, "Today's activity has not been completed yet.")
                    .with_min_local_hour(23),
            ],
        );
        units.insert(
            FrequencyUnit::Weeks,
            vec![
                Threshold::new(80.0, Priority::Normal, approaching("weekly")),
                Threshold::new(95.0, Priority::High, almost("weekly")),
            ],
        );
        units.insert(
            FrequencyUnit::Months,
            vec![
                Threshold::new(85.0, Priority::Normal, approaching("monthly")),
                Threshold::new(95.0, Priority::High, almost("monthly")),
            ],
        );
        units.insert(
            FrequencyUnit::Quarters,
            vec![
                Threshold::new(80.0, Priority::Normal, approaching("quarterly")),
                Threshold::new(90.0, Priority::High, almost("quarterly")),
            ],
        );
        units.insert(
            FrequencyUnit::Years,
            vec![
                Threshold::new(90.0, Priority::Normal, approaching("yearly")),
                Threshold::new(95.0, Priority::High, almost("yearly")),
            ],
        );
        Self::new(units)
    }
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self::reference()
    }
}

impl From<BTreeMap<FrequencyUnit, Vec<Threshold>>> for NotificationPolicy {
    fn from(units: BTreeMap<FrequencyUnit, Vec<Threshold>>) -> Self {
        Self::new(units)
    }
}

impl From<NotificationPolicy> for BTreeMap<FrequencyUnit, Vec<Threshold>> {
    fn from(policy: NotificationPolicy) -> Self {
        policy.units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers(policy: &NotificationPolicy, unit: FrequencyUnit) -> Vec<(f64, Priority)> {
        policy
            .thresholds(unit)
            .unwrap()
            .iter()
            .map(|t| (t.percent, t.priority))
            .collect()
    }

    #[test]
    fn reference_table_matches_production() {
        let p = NotificationPolicy::reference();
        assert_eq!(tiers(&p, FrequencyUnit::Days), vec![(100.0, Priority::High)]);
        assert_eq!(
            tiers(&p, FrequencyUnit::Weeks),
            vec![(95.0, Priority::High), (80.0, Priority::Normal)]
        );
        assert_eq!(
            tiers(&p, FrequencyUnit::Months),
            vec![(95.0, Priority::High), (85.0, Priority::Normal)]
        );
        assert_eq!(
            tiers(&p, FrequencyUnit::Quarters),
            vec![(90.0, Priority::High), (80.0, Priority::Normal)]
        );
        assert_eq!(
            tiers(&p, FrequencyUnit::Years),
            vec![(95.0, Priority::High), (90.0, Priority::Normal)]
        );
        assert_eq!(
            p.thresholds(FrequencyUnit::Days).unwrap()[0].min_local_hour,
            Some(23)
        );
    }

    #[test]
    fn hour_gate_is_part_of_the_threshold() {
        let t = Threshold::new(100.0, Priority::High, "x").with_min_local_hour(23);
        assert!(!t.admits(100.0, 22));
        assert!(t.admits(100.0, 23));
        assert!(!t.admits(99.9, 23));
    }

    #[test]
    fn loads_from_toml_and_sorts() {
        let src = r#"
weeks = [
  { percent = 50.0, priority = "low", message = "halfway" },
  { percent = 90.0, priority = "urgent", message = "now" },
]
"#;
        let p: NotificationPolicy = toml::from_str(src).unwrap();
        assert_eq!(
            tiers(&p, FrequencyUnit::Weeks),
            vec![(90.0, Priority::Urgent), (50.0, Priority::Low)]
        );
        assert!(p.thresholds(FrequencyUnit::Days).is_none());
    }
}

//! Activity model: a recurring habit with a target period.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyUnit {
    Days,
    Weeks,
    Months,
    Quarters,
    Years,
}

impl FrequencyUnit {
    pub const ALL: [FrequencyUnit; 5] = [
        FrequencyUnit::Days,
        FrequencyUnit::Weeks,
        FrequencyUnit::Months,
        FrequencyUnit::Quarters,
        FrequencyUnit::Years,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyUnit::Days => "days",
            FrequencyUnit::Weeks => "weeks",
            FrequencyUnit::Months => "months",
            FrequencyUnit::Quarters => "quarters",
            FrequencyUnit::Years => "years",
        }
    }

    /// Singular label used in human-facing text ("1 week", "3 weeks").
    pub fn label(&self, value: u32) -> &'static str {
        match (self, value == 1) {
            (FrequencyUnit::Days, true) => "day",
            (FrequencyUnit::Days, false) => "days",
            (FrequencyUnit::Weeks, true) => "week",
            (FrequencyUnit::Weeks, false) => "weeks",
            (FrequencyUnit::Months, true) => "month",
            (FrequencyUnit::Months, false) => "months",
            (FrequencyUnit::Quarters, true) => "quarter",
            (FrequencyUnit::Quarters, false) => "quarters",
            (FrequencyUnit::Years, true) => "year",
            (FrequencyUnit::Years, false) => "years",
        }
    }
}

impl fmt::Display for FrequencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrequencyUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "days" | "day" => Ok(FrequencyUnit::Days),
            "weeks" | "week" => Ok(FrequencyUnit::Weeks),
            "months" | "month" => Ok(FrequencyUnit::Months),
            "quarters" | "quarter" => Ok(FrequencyUnit::Quarters),
            "years" | "year" => Ok(FrequencyUnit::Years),
            other => bail!("unknown frequency unit: {other}"),
        }
    }
}

/// Whether the period came from one of the preset buttons or was typed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyType {
    #[default]
    Preset,
    Custom,
}

impl FrequencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyType::Preset => "preset",
            FrequencyType::Custom => "custom",
        }
    }
}

/// Recurrence period. `value` is always >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    pub kind: FrequencyType,
    pub value: u32,
    pub unit: FrequencyUnit,
}

impl Frequency {
    pub fn custom(value: u32, unit: FrequencyUnit) -> Result<Self> {
        if value == 0 {
            bail!("frequency value must be at least 1");
        }
        Ok(Self {
            kind: FrequencyType::Custom,
            value,
            unit,
        })
    }

    /// Presets offered by the activity form: daily, weekly, monthly, quarterly, yearly.
    pub fn preset(name: &str) -> Result<Self> {
        let unit = match name.trim().to_ascii_lowercase().as_str() {
            "daily" => FrequencyUnit::Days,
            "weekly" => FrequencyUnit::Weeks,
            "monthly" => FrequencyUnit::Months,
            "quarterly" => FrequencyUnit::Quarters,
            "yearly" => FrequencyUnit::Years,
            other => bail!("unknown preset: {other} (daily|weekly|monthly|quarterly|yearly)"),
        };
        Ok(Self {
            kind: FrequencyType::Preset,
            value: 1,
            unit,
        })
    }

    /// "1 week", "3 days".
    pub fn text(&self) -> String {
        format!("{} {}", self.value, self.unit.label(self.value))
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self {
            kind: FrequencyType::Preset,
            value: 1,
            unit: FrequencyUnit::Days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub category: Option<String>,
    pub frequency: Frequency,
    pub is_active: bool,
}

/// One recorded execution of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub id: i64,
    pub activity_id: i64,
    pub executed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Flat row handed to the engine by storage: an active activity joined with
/// its latest move.
///
/// `frequency_unit` stays a raw string so rows written by older clients with
/// a unit this build does not know still reach the evaluator, which flags them
/// instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub activity_id: i64,
    pub user_id: String,
    pub title: String,
    pub frequency_value: u32,
    pub frequency_unit: String,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl ActivitySnapshot {
    pub fn new(
        activity_id: i64,
        user_id: impl Into<String>,
        title: impl Into<String>,
        frequency_value: u32,
        frequency_unit: FrequencyUnit,
    ) -> Self {
        Self {
            activity_id,
            user_id: user_id.into(),
            title: title.into(),
            frequency_value,
            frequency_unit: frequency_unit.as_str().to_string(),
            last_executed_at: None,
        }
    }

    pub fn with_last_executed_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_executed_at = Some(at);
        self
    }

    pub fn unit(&self) -> Option<FrequencyUnit> {
        self.frequency_unit.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units_case_insensitively() {
        assert_eq!("Weeks".parse::<FrequencyUnit>().unwrap(), FrequencyUnit::Weeks);
        assert_eq!("quarter".parse::<FrequencyUnit>().unwrap(), FrequencyUnit::Quarters);
        assert!("fortnights".parse::<FrequencyUnit>().is_err());
    }

    #[test]
    fn zero_value_is_rejected() {
        assert!(Frequency::custom(0, FrequencyUnit::Days).is_err());
        let f = Frequency::custom(3, FrequencyUnit::Days).unwrap();
        assert_eq!(f.kind, FrequencyType::Custom);
        assert_eq!(f.text(), "3 days");
    }

    #[test]
    fn presets_are_single_units() {
        let weekly = Frequency::preset("weekly").unwrap();
        assert_eq!(weekly.value, 1);
        assert_eq!(weekly.unit, FrequencyUnit::Weeks);
        assert_eq!(weekly.text(), "1 week");
        assert!(Frequency::preset("hourly").is_err());
    }

    #[test]
    fn snapshot_with_unknown_unit_has_no_parsed_unit() {
        let mut s = ActivitySnapshot::new(1, "u1", "read", 1, FrequencyUnit::Days);
        assert_eq!(s.unit(), Some(FrequencyUnit::Days));
        s.frequency_unit = "fortnights".to_string();
        assert_eq!(s.unit(), None);
    }
}

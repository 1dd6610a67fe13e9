//! Records that flow through the pipeline, from raw spreadsheet rows to the
//! derived documents read by the dashboard.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sentinel zone written for districts first seen without a zone column.
pub const UNASSIGNED_ZONE: &str = "Unassigned";

/// A single spreadsheet cell as produced by the tabular parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Empty,
}

impl RawValue {
    pub fn is_empty(&self) -> bool {
        match self {
            RawValue::Empty => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Header -> cell mapping for one data row. Only lives between the parser
/// and the normalizer.
pub type RawRow = BTreeMap<String, RawValue>;

/// Zone carried by a normalized row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Zone {
    /// Taken from the row itself; overwrites whatever is stored.
    Named(String),
    /// No zone in the row; `"Unassigned"` is written only when the district
    /// has no zone yet.
    Unassigned,
}

/// Normalized per-district metrics for one ingested row.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictMetrics {
    pub id: String,
    pub district_name: String,
    pub hps_score: f64,
    pub nbws_executed: f64,
    pub conviction_ratio: f64,
    pub drug_seizure_kg: f64,
    pub cases_solved: f64,
    pub recognitions: f64,
    pub zone: Option<Zone>,
}

/// A district as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictRecord {
    pub id: String,
    pub district_name: String,
    pub hps_score: f64,
    pub nbws_executed: f64,
    pub conviction_ratio: f64,
    pub drug_seizure_kg: f64,
    pub cases_solved: f64,
    pub recognitions: f64,
    pub zone: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatewideSummary {
    pub statewide_conviction_ratio: f64,
    #[serde(rename = "totalDrugSeizureVolume_kg")]
    pub total_drug_seizure_volume_kg: f64,
    pub total_nbws_executed: f64,
    #[serde(rename = "totalValueRecovered_INR")]
    pub total_value_recovered_inr: f64,
    #[serde(rename = "last_updated")]
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub top_performers: Vec<String>,
    pub risk_districts: Vec<String>,
    #[serde(rename = "naturalLanguageSummary")]
    pub natural_language_summary: String,
    #[serde(rename = "predictiveAlert")]
    pub predictive_alert: String,
    #[serde(rename = "keyTopics")]
    pub key_topics: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalDataPoint {
    pub id: String,
    pub month: String,
    #[serde(rename = "convictionRatio")]
    pub conviction_ratio: f64,
    #[serde(rename = "nbwsExecuted")]
    pub nbws_executed: f64,
    #[serde(rename = "drugSeizure_kg")]
    pub drug_seizure_kg: f64,
}

/// Calendar month used as the key of a historical data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn of(ts: DateTime<Utc>) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    /// The calendar month before the one containing `ts`.
    pub fn previous(ts: DateTime<Utc>) -> Self {
        if ts.month() == 1 {
            Self {
                year: ts.year() - 1,
                month: 12,
            }
        } else {
            Self {
                year: ts.year(),
                month: ts.month() - 1,
            }
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        // month is validated by every constructor
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Short month label, e.g. `"Sep"`.
    pub fn label(&self) -> String {
        self.first_day().format("%b").to_string()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        MonthKey::of(ts) == *self
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got '{}'", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in '{}'", s))?;
        MonthKey::new(year, month).ok_or_else(|| format!("month out of range in '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_month_key_previous_wraps_year() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap();
        let prev = MonthKey::previous(ts);
        assert_eq!(prev.to_string(), "2024-12");
        assert_eq!(prev.label(), "Dec");
    }

    #[test]
    fn test_month_key_parse() {
        let key: MonthKey = "2025-09".parse().unwrap();
        assert_eq!(key, MonthKey { year: 2025, month: 9 });
        assert_eq!(key.label(), "Sep");
        assert!("2025-13".parse::<MonthKey>().is_err());
        assert!("september".parse::<MonthKey>().is_err());
    }

    #[test]
    fn test_month_key_contains() {
        let key: MonthKey = "2025-09".parse().unwrap();
        assert!(key.contains(Utc.with_ymd_and_hms(2025, 9, 30, 23, 59, 59).unwrap()));
        assert!(!key.contains(Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_raw_value_empty() {
        assert!(RawValue::Empty.is_empty());
        assert!(RawValue::Text("   ".into()).is_empty());
        assert!(!RawValue::Number(0.0).is_empty());
    }
}

//! Aggregation engine.
//!
//! Reads the district store as a whole and recomputes the statewide summary
//! and the insight report from scratch on every run. Historical points are
//! computed from a batch only, never from the full store.
//!
//! Every computation here is deterministic given the same input order; only
//! the `last_updated` / `generated_at` stamps differ between runs.

use crate::error::StoreError;
use crate::model::{
    DistrictMetrics, DistrictRecord, HistoricalDataPoint, InsightReport, MonthKey,
    StatewideSummary,
};
use crate::store::MetricsStore;
use chrono::{DateTime, Utc};
use tracing::info;

/// Size of the top performer and bottom fallback lists.
pub const LEADERBOARD_SIZE: usize = 3;

/// Districts with a conviction ratio strictly below this are at risk.
pub const RISK_CONVICTION_THRESHOLD: f64 = 40.0;

/// Street value used to turn seized kilograms into rupees.
pub const DRUG_VALUE_INR_PER_KG: f64 = 100_000.0;

pub const KEY_TOPICS: &[&str] = &[
    "NBW Execution Rate",
    "Narcotics Enforcement",
    "Conviction Ratio",
    "HPS Score",
];

pub const STABLE_ALERT: &str = "Overall performance is stable.";

/// The three values every aggregate needs, whether the source is a stored
/// district or a freshly normalized row.
pub trait DistrictStats {
    fn conviction_ratio(&self) -> f64;
    fn nbws_executed(&self) -> f64;
    fn drug_seizure_kg(&self) -> f64;
}

impl DistrictStats for DistrictRecord {
    fn conviction_ratio(&self) -> f64 {
        self.conviction_ratio
    }
    fn nbws_executed(&self) -> f64 {
        self.nbws_executed
    }
    fn drug_seizure_kg(&self) -> f64 {
        self.drug_seizure_kg
    }
}

impl DistrictStats for DistrictMetrics {
    fn conviction_ratio(&self) -> f64 {
        self.conviction_ratio
    }
    fn nbws_executed(&self) -> f64 {
        self.nbws_executed
    }
    fn drug_seizure_kg(&self) -> f64 {
        self.drug_seizure_kg
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub count: usize,
    pub nbws_executed: f64,
    pub drug_seizure_kg: f64,
    /// Mean conviction ratio, one decimal; 0 when empty.
    pub mean_conviction_ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregates {
    pub summary: StatewideSummary,
    pub insights: InsightReport,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn totals<T: DistrictStats>(items: &[T]) -> Totals {
    let mut conviction_sum = 0.0;
    let mut totals = Totals {
        count: items.len(),
        ..Totals::default()
    };

    for item in items {
        totals.nbws_executed += item.nbws_executed();
        totals.drug_seizure_kg += item.drug_seizure_kg();
        conviction_sum += item.conviction_ratio();
    }

    if totals.count > 0 {
        totals.mean_conviction_ratio = round1(conviction_sum / totals.count as f64);
    }
    totals
}

pub fn summarize(districts: &[DistrictRecord], now: DateTime<Utc>) -> StatewideSummary {
    let t = totals(districts);
    StatewideSummary {
        statewide_conviction_ratio: t.mean_conviction_ratio,
        total_drug_seizure_volume_kg: t.drug_seizure_kg,
        total_nbws_executed: t.nbws_executed,
        total_value_recovered_inr: t.drug_seizure_kg * DRUG_VALUE_INR_PER_KG,
        last_updated: now,
    }
}

/// Districts ordered by score, highest first. Stable: equal scores keep
/// scan order.
pub fn leaderboard(districts: &[DistrictRecord]) -> Vec<&DistrictRecord> {
    let mut ranked: Vec<&DistrictRecord> = districts.iter().collect();
    ranked.sort_by(|a, b| b.hps_score.total_cmp(&a.hps_score));
    ranked
}

/// First district holding the maximum of `key`, in scan order.
fn leader_by<F>(districts: &[DistrictRecord], key: F) -> Option<&DistrictRecord>
where
    F: Fn(&DistrictRecord) -> f64,
{
    districts.iter().fold(None, |best, d| match best {
        Some(b) if key(b) >= key(d) => Some(b),
        _ => Some(d),
    })
}

/// Districts under the risk threshold, in scan order.
pub fn at_risk(districts: &[DistrictRecord]) -> Vec<&DistrictRecord> {
    districts
        .iter()
        .filter(|d| d.conviction_ratio < RISK_CONVICTION_THRESHOLD)
        .collect()
}

pub fn build_insights(districts: &[DistrictRecord], now: DateTime<Utc>) -> Option<InsightReport> {
    let top_nbw = leader_by(districts, |d| d.nbws_executed)?;
    let top_drug = leader_by(districts, |d| d.drug_seizure_kg)?;

    let ranked = leaderboard(districts);
    let top_performers: Vec<String> = ranked
        .iter()
        .take(LEADERBOARD_SIZE)
        .map(|d| d.district_name.clone())
        .collect();
    let bottom: Vec<String> = ranked
        .iter()
        .rev()
        .take(LEADERBOARD_SIZE)
        .map(|d| d.district_name.clone())
        .collect();

    let flagged: Vec<String> = at_risk(districts)
        .iter()
        .map(|d| d.district_name.clone())
        .collect();

    let predictive_alert = if flagged.is_empty() {
        STABLE_ALERT.to_string()
    } else {
        format!(
            "Attention recommended for {} due to conviction ratios falling below the {}% threshold.",
            flagged.join(", "),
            RISK_CONVICTION_THRESHOLD
        )
    };

    let natural_language_summary = format!(
        "This period, {} led in NBW execution with {} warrants cleared, while {} was most effective in narcotics enforcement, seizing {}kg of drugs.",
        top_nbw.district_name, top_nbw.nbws_executed, top_drug.district_name, top_drug.drug_seizure_kg
    );

    Some(InsightReport {
        top_performers,
        risk_districts: if flagged.is_empty() { bottom } else { flagged },
        natural_language_summary,
        predictive_alert,
        key_topics: KEY_TOPICS.iter().map(|t| t.to_string()).collect(),
        generated_at: now,
    })
}

/// Summary and insights for a full store scan; `None` when there are no
/// districts.
pub fn aggregate(districts: &[DistrictRecord], now: DateTime<Utc>) -> Option<Aggregates> {
    let insights = build_insights(districts, now)?;
    Some(Aggregates {
        summary: summarize(districts, now),
        insights,
    })
}

/// Historical point for one month, computed over the given batch only.
pub fn historical_point<T: DistrictStats>(
    month: MonthKey,
    batch: &[T],
) -> Option<HistoricalDataPoint> {
    if batch.is_empty() {
        return None;
    }
    let t = totals(batch);
    Some(HistoricalDataPoint {
        id: month.to_string(),
        month: month.label(),
        conviction_ratio: t.mean_conviction_ratio,
        nbws_executed: t.nbws_executed,
        drug_seizure_kg: t.drug_seizure_kg,
    })
}

/// Scan the store, recompute the derived singletons and write them.
/// Returns `None` (and writes nothing) when the store is empty.
pub async fn refresh_derived<S>(store: &S, now: DateTime<Utc>) -> Result<Option<Aggregates>, StoreError>
where
    S: MetricsStore + ?Sized,
{
    let districts = store.list_districts().await?;
    let Some(aggregates) = aggregate(&districts, now) else {
        return Ok(None);
    };

    store.put_summary(&aggregates.summary).await?;
    store.put_insights(&aggregates.insights).await?;
    info!(
        districts = districts.len(),
        top = ?aggregates.insights.top_performers,
        risk = ?aggregates.insights.risk_districts,
        "summary and insights regenerated"
    );
    Ok(Some(aggregates))
}

/// Compute and write the historical point for `month` from `batch`.
pub async fn record_history<S, T>(
    store: &S,
    month: MonthKey,
    batch: &[T],
) -> Result<Option<HistoricalDataPoint>, StoreError>
where
    S: MetricsStore + ?Sized,
    T: DistrictStats + Sync,
{
    let Some(point) = historical_point(month, batch) else {
        return Ok(None);
    };
    store.put_historical(&point).await?;
    info!(month = %point.id, rows = batch.len(), "historical data point saved");
    Ok(Some(point))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn district(name: &str, hps: f64, conviction: f64, nbws: f64, drug: f64) -> DistrictRecord {
        DistrictRecord {
            id: crate::normalize::district_id(name),
            district_name: name.to_string(),
            hps_score: hps,
            nbws_executed: nbws,
            conviction_ratio: conviction,
            drug_seizure_kg: drug,
            cases_solved: 0.0,
            recognitions: 0.0,
            zone: None,
            last_updated: Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 2, 1, 0, 0).unwrap()
    }

    fn sample() -> Vec<DistrictRecord> {
        vec![
            district("Balasore", 72.0, 65.0, 140.0, 12.0),
            district("Cuttack", 91.0, 78.0, 210.0, 8.5),
            district("Ganjam", 55.0, 52.0, 95.0, 30.25),
            district("Khordha", 84.0, 81.0, 180.0, 4.0),
            district("Puri", 63.0, 47.0, 60.0, 2.0),
        ]
    }

    // -------------------------------------------------------------------------
    // SUMMARY
    // -------------------------------------------------------------------------

    #[test]
    fn test_summary_totals() {
        let summary = summarize(&sample(), now());
        assert_eq!(summary.total_nbws_executed, 685.0);
        assert_eq!(summary.total_drug_seizure_volume_kg, 56.75);
        // (65 + 78 + 52 + 81 + 47) / 5 = 64.6
        assert_eq!(summary.statewide_conviction_ratio, 64.6);
        assert_eq!(summary.total_value_recovered_inr, 56.75 * DRUG_VALUE_INR_PER_KG);
        assert_eq!(summary.last_updated, now());
    }

    #[test]
    fn test_summary_mean_rounded_to_one_decimal() {
        let districts = vec![
            district("A", 0.0, 33.0, 0.0, 0.0),
            district("B", 0.0, 34.0, 0.0, 0.0),
            district("C", 0.0, 34.0, 0.0, 0.0),
        ];
        // 101 / 3 = 33.666..
        assert_eq!(summarize(&districts, now()).statewide_conviction_ratio, 33.7);
    }

    #[test]
    fn test_summary_of_nothing_is_zero() {
        let summary = summarize(&[], now());
        assert_eq!(summary.statewide_conviction_ratio, 0.0);
        assert_eq!(summary.total_nbws_executed, 0.0);
    }

    // -------------------------------------------------------------------------
    // LEADERBOARD
    // -------------------------------------------------------------------------

    #[test]
    fn test_top_performers_by_score() {
        let report = build_insights(&sample(), now()).unwrap();
        assert_eq!(report.top_performers, vec!["Cuttack", "Khordha", "Balasore"]);
    }

    #[test]
    fn test_leaderboard_is_stable_for_ties() {
        let districts = vec![
            district("A", 50.0, 90.0, 0.0, 0.0),
            district("B", 70.0, 90.0, 0.0, 0.0),
            district("C", 50.0, 90.0, 0.0, 0.0),
        ];
        let names: Vec<&str> = leaderboard(&districts)
            .iter()
            .map(|d| d.district_name.as_str())
            .collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_fewer_districts_than_leaderboard() {
        let districts = vec![district("Solo", 10.0, 90.0, 1.0, 1.0)];
        let report = build_insights(&districts, now()).unwrap();
        assert_eq!(report.top_performers, vec!["Solo"]);
        assert_eq!(report.risk_districts, vec!["Solo"]);
    }

    // -------------------------------------------------------------------------
    // RISK DISTRICTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_risk_threshold_set_in_scan_order() {
        let districts = vec![
            district("A", 10.0, 30.0, 1.0, 1.0),
            district("B", 90.0, 70.0, 2.0, 2.0),
            district("C", 50.0, 35.0, 3.0, 3.0),
        ];
        let report = build_insights(&districts, now()).unwrap();
        assert_eq!(report.risk_districts, vec!["A", "C"]);
        assert_eq!(
            report.predictive_alert,
            "Attention recommended for A, C due to conviction ratios falling below the 40% threshold."
        );
    }

    #[test]
    fn test_risk_falls_back_to_bottom_of_leaderboard() {
        let report = build_insights(&sample(), now()).unwrap();
        // Nobody is under 40%, so the three lowest scores, lowest first
        assert_eq!(report.risk_districts, vec!["Ganjam", "Puri", "Balasore"]);
        assert_eq!(report.predictive_alert, STABLE_ALERT);
    }

    #[test]
    fn test_threshold_is_strict() {
        let districts = vec![
            district("Edge", 10.0, 40.0, 1.0, 1.0),
            district("Under", 20.0, 39.9, 1.0, 1.0),
        ];
        assert_eq!(
            build_insights(&districts, now()).unwrap().risk_districts,
            vec!["Under"]
        );
    }

    // -------------------------------------------------------------------------
    // NATURAL LANGUAGE SUMMARY
    // -------------------------------------------------------------------------

    #[test]
    fn test_natural_language_summary_names_leaders() {
        let report = build_insights(&sample(), now()).unwrap();
        assert_eq!(
            report.natural_language_summary,
            "This period, Cuttack led in NBW execution with 210 warrants cleared, while Ganjam was most effective in narcotics enforcement, seizing 30.25kg of drugs."
        );
    }

    #[test]
    fn test_summary_ties_go_to_first_in_scan_order() {
        let districts = vec![
            district("First", 1.0, 90.0, 100.0, 5.0),
            district("Second", 2.0, 90.0, 100.0, 5.0),
        ];
        let report = build_insights(&districts, now()).unwrap();
        assert!(report.natural_language_summary.starts_with("This period, First led"));
        assert!(report.natural_language_summary.contains("while First was most effective"));
    }

    #[test]
    fn test_key_topics_fixed() {
        let report = build_insights(&sample(), now()).unwrap();
        assert_eq!(report.key_topics, KEY_TOPICS);
    }

    // -------------------------------------------------------------------------
    // IDEMPOTENCE
    // -------------------------------------------------------------------------

    #[test]
    fn test_aggregate_idempotent_on_frozen_input() {
        let districts = sample();
        let first = aggregate(&districts, now()).unwrap();
        let later = now() + chrono::Duration::days(1);
        let second = aggregate(&districts, later).unwrap();

        assert_eq!(first.insights.top_performers, second.insights.top_performers);
        assert_eq!(first.insights.risk_districts, second.insights.risk_districts);
        assert_eq!(
            first.insights.natural_language_summary,
            second.insights.natural_language_summary
        );
        assert_eq!(first.insights.predictive_alert, second.insights.predictive_alert);
        assert_eq!(
            first.summary.total_nbws_executed,
            second.summary.total_nbws_executed
        );
        assert_eq!(
            first.summary.statewide_conviction_ratio,
            second.summary.statewide_conviction_ratio
        );
        assert_ne!(first.insights.generated_at, second.insights.generated_at);
    }

    #[test]
    fn test_aggregate_empty_is_none() {
        assert!(aggregate(&[], now()).is_none());
    }

    // -------------------------------------------------------------------------
    // HISTORICAL
    // -------------------------------------------------------------------------

    #[test]
    fn test_historical_point_from_batch() {
        let month: MonthKey = "2025-08".parse().unwrap();
        let point = historical_point(month, &sample()[..2]).unwrap();
        assert_eq!(point.id, "2025-08");
        assert_eq!(point.month, "Aug");
        assert_eq!(point.nbws_executed, 350.0);
        assert_eq!(point.drug_seizure_kg, 20.5);
        assert_eq!(point.conviction_ratio, 71.5);
    }

    #[test]
    fn test_historical_point_empty_batch() {
        let month: MonthKey = "2025-08".parse().unwrap();
        assert!(historical_point::<DistrictRecord>(month, &[]).is_none());
    }

    // -------------------------------------------------------------------------
    // STORE ROUND TRIP
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_derived_writes_both_singletons() {
        let store = MemoryStore::with_districts(sample());
        let aggregates = refresh_derived(&store, now()).await.unwrap().unwrap();

        assert_eq!(store.summary().await.unwrap(), Some(aggregates.summary));
        assert_eq!(store.insights().await.unwrap(), Some(aggregates.insights));
        assert_eq!(store.write_count().await, 2);
    }

    #[tokio::test]
    async fn test_refresh_derived_on_empty_store_writes_nothing() {
        let store = MemoryStore::new();
        assert!(refresh_derived(&store, now()).await.unwrap().is_none());
        assert_eq!(store.write_count().await, 0);
    }
}

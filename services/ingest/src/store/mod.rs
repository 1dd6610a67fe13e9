//! Persistent store seam. Components take a `MetricsStore` explicitly; there
//! is no process-wide handle.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StoreError;
use crate::model::{
    DistrictMetrics, DistrictRecord, HistoricalDataPoint, InsightReport, StatewideSummary, Zone,
    UNASSIGNED_ZONE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Whether the district existed when the batch snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteVerb {
    Set,
    Update,
}

/// One merge-write of a district record.
#[derive(Debug, Clone)]
pub struct DistrictWrite {
    pub verb: WriteVerb,
    pub metrics: DistrictMetrics,
    pub last_updated: DateTime<Utc>,
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Ids of every stored district.
    async fn district_ids(&self) -> Result<HashSet<String>, StoreError>;

    /// Apply all writes atomically. Both verbs merge into any stored record.
    async fn commit_district_batch(&self, writes: &[DistrictWrite]) -> Result<(), StoreError>;

    /// Full scan, ordered by id bytewise.
    async fn list_districts(&self) -> Result<Vec<DistrictRecord>, StoreError>;

    async fn put_summary(&self, summary: &StatewideSummary) -> Result<(), StoreError>;
    async fn put_insights(&self, report: &InsightReport) -> Result<(), StoreError>;
    async fn put_historical(&self, point: &HistoricalDataPoint) -> Result<(), StoreError>;

    async fn summary(&self) -> Result<Option<StatewideSummary>, StoreError>;
    async fn insights(&self) -> Result<Option<InsightReport>, StoreError>;

    /// Ordered by month id.
    async fn historical(&self) -> Result<Vec<HistoricalDataPoint>, StoreError>;
}

/// Merge a write into the currently stored record (if any).
pub(crate) fn merge_district(
    existing: Option<&DistrictRecord>,
    write: &DistrictWrite,
) -> DistrictRecord {
    let m = &write.metrics;
    let current_zone = existing.and_then(|e| e.zone.clone());
    let zone = match &m.zone {
        Some(Zone::Named(z)) => Some(z.clone()),
        Some(Zone::Unassigned) => current_zone.or_else(|| Some(UNASSIGNED_ZONE.to_string())),
        None => current_zone,
    };

    DistrictRecord {
        id: m.id.clone(),
        district_name: m.district_name.clone(),
        hps_score: m.hps_score,
        nbws_executed: m.nbws_executed,
        conviction_ratio: m.conviction_ratio,
        drug_seizure_kg: m.drug_seizure_kg,
        cases_solved: m.cases_solved,
        recognitions: m.recognitions,
        zone,
        last_updated: write.last_updated,
    }
}

/// Bind values for the zone column: the value and whether it is only a
/// fallback that must not replace a stored zone.
pub(crate) fn zone_binding(zone: &Option<Zone>) -> (Option<&str>, bool) {
    match zone {
        Some(Zone::Named(z)) => (Some(z.as_str()), false),
        Some(Zone::Unassigned) => (Some(UNASSIGNED_ZONE), true),
        None => (None, false),
    }
}

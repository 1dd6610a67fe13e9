//! Row normalizer: raw row records -> typed `DistrictMetrics`.

use crate::error::RowRejection;
use crate::model::{DistrictMetrics, RawRow, RawValue, Zone};
use tracing::warn;

/// Header names tried, in order, for the district name.
pub const DISTRICT_NAME_FIELDS: &[&str] = &["name", "District", "district_name"];

/// What to do with rows that carry no zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZonePolicy {
    /// Mark the district `"Unassigned"` unless it already has a zone.
    Unassigned,
    /// Leave the stored zone untouched.
    Preserve,
}

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<DistrictMetrics>,
    /// 1-based data row index and reason.
    pub rejected: Vec<(usize, RowRejection)>,
}

/// Stable district key: trimmed, whitespace runs -> `_`, lowercased.
pub fn district_id(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

fn district_name(row: &RawRow) -> Option<String> {
    DISTRICT_NAME_FIELDS.iter().find_map(|field| match row.get(*field) {
        Some(RawValue::Text(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Lenient numeric coercion; anything unusable becomes 0.
fn number(row: &RawRow, field: &str) -> f64 {
    let value = match row.get(field) {
        Some(RawValue::Number(n)) => *n,
        Some(RawValue::Text(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(RawValue::Bool(true)) => 1.0,
        _ => 0.0,
    };
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn zone(row: &RawRow, policy: ZonePolicy) -> Option<Zone> {
    match row.get("zone") {
        Some(RawValue::Text(s)) if !s.trim().is_empty() => Some(Zone::Named(s.trim().to_string())),
        _ => match policy {
            ZonePolicy::Unassigned => Some(Zone::Unassigned),
            ZonePolicy::Preserve => None,
        },
    }
}

pub fn normalize_row(row: &RawRow, policy: ZonePolicy) -> Result<DistrictMetrics, RowRejection> {
    let district_name = district_name(row).ok_or(RowRejection::MissingDistrictName)?;

    Ok(DistrictMetrics {
        id: district_id(&district_name),
        hps_score: number(row, "hps_score"),
        nbws_executed: number(row, "nbws_executed"),
        conviction_ratio: number(row, "conviction_ratio"),
        drug_seizure_kg: number(row, "drug_seizure_kg"),
        cases_solved: number(row, "cases_solved"),
        recognitions: number(row, "recognitions"),
        zone: zone(row, policy),
        district_name,
    })
}

/// Normalize every row, logging and collecting rejections.
pub fn normalize_batch(rows: &[RawRow], policy: ZonePolicy) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();

    for (idx, row) in rows.iter().enumerate() {
        match normalize_row(row, policy) {
            Ok(record) => batch.records.push(record),
            Err(reason) => {
                warn!(row = idx + 1, fields = ?row, %reason, "skipping row");
                batch.rejected.push((idx + 1, reason));
            }
        }
    }

    batch
}

// =============================================================================
// TESTS
// =============================================================================

//! District upsert engine: merges a normalized batch into the store in
//! sequential, independently committed sub-batches.

use crate::error::StoreError;
use crate::model::DistrictMetrics;
use crate::store::{DistrictWrite, MetricsStore, WriteVerb};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info};

/// Largest number of writes committed in one atomic sub-batch.
pub const DEFAULT_BATCH_LIMIT: usize = 450;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub written: usize,
    pub inserted: usize,
    pub updated: usize,
    pub batches: usize,
}

/// Collapse records sharing an id. The last record wins and takes the slot
/// of the first occurrence.
pub fn dedupe_by_id(records: Vec<DistrictMetrics>) -> Vec<DistrictMetrics> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<DistrictMetrics> = Vec::with_capacity(records.len());

    for record in records {
        match slots.get(&record.id) {
            Some(&slot) => out[slot] = record,
            None => {
                slots.insert(record.id.clone(), out.len());
                out.push(record);
            }
        }
    }

    out
}

/// Upsert one ingestion batch. Sub-batches already committed stay applied
/// when a later one fails.
pub async fn upsert_batch<S>(
    store: &S,
    records: Vec<DistrictMetrics>,
    now: DateTime<Utc>,
    batch_limit: usize,
) -> Result<UpsertReport, StoreError>
where
    S: MetricsStore + ?Sized,
{
    let records = dedupe_by_id(records);
    let mut report = UpsertReport::default();
    if records.is_empty() {
        return Ok(report);
    }

    let existing = store.district_ids().await?;
    debug!(existing = existing.len(), "district snapshot loaded");

    let writes: Vec<DistrictWrite> = records
        .into_iter()
        .map(|metrics| DistrictWrite {
            verb: if existing.contains(&metrics.id) {
                WriteVerb::Update
            } else {
                WriteVerb::Set
            },
            metrics,
            last_updated: now,
        })
        .collect();

    for (idx, chunk) in writes.chunks(batch_limit.max(1)).enumerate() {
        if let Err(source) = store.commit_district_batch(chunk).await {
            error!(
                batch = idx + 1,
                committed = report.written,
                error = %source,
                "district batch failed; earlier batches stay applied"
            );
            return Err(StoreError::PartialBatch {
                batch: idx + 1,
                committed: report.written,
                source: Box::new(source),
            });
        }

        let inserted = chunk.iter().filter(|w| w.verb == WriteVerb::Set).count();
        report.batches += 1;
        report.written += chunk.len();
        report.inserted += inserted;
        report.updated += chunk.len() - inserted;
        debug!(batch = idx + 1, size = chunk.len(), "district batch committed");
    }

    info!(
        written = report.written,
        inserted = report.inserted,
        updated = report.updated,
        batches = report.batches,
        "district upsert complete"
    );
    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================

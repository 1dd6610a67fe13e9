use super::{merge_district, DistrictWrite, MetricsStore};
use crate::error::StoreError;
use crate::model::{DistrictRecord, HistoricalDataPoint, InsightReport, StatewideSummary};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

/// In-process store used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    districts: BTreeMap<String, DistrictRecord>,
    summary: Option<StatewideSummary>,
    insights: Option<InsightReport>,
    historical: BTreeMap<String, HistoricalDataPoint>,
    batch_attempts: usize,
    batches_committed: usize,
    writes: usize,
    fail_on_batch: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_districts(records: impl IntoIterator<Item = DistrictRecord>) -> Self {
        let state = MemoryState {
            districts: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Make the n-th (1-based) district batch commit fail.
    pub fn fail_on_batch(self, n: usize) -> Self {
        let mut state = self.state.into_inner();
        state.fail_on_batch = Some(n);
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn batches_committed(&self) -> usize {
        self.state.lock().await.batches_committed
    }

    /// Number of store writes of any kind.
    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }

    pub async fn district(&self, id: &str) -> Option<DistrictRecord> {
        self.state.lock().await.districts.get(id).cloned()
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn district_ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.state.lock().await.districts.keys().cloned().collect())
    }

    async fn commit_district_batch(&self, writes: &[DistrictWrite]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.batch_attempts += 1;
        if state.fail_on_batch == Some(state.batch_attempts) {
            return Err(StoreError::Unavailable(format!(
                "injected failure on batch {}",
                state.batch_attempts
            )));
        }

        // Stage first so the batch applies all-or-nothing
        let mut staged = Vec::with_capacity(writes.len());
        for write in writes {
            let merged = merge_district(state.districts.get(&write.metrics.id), write);
            staged.push(merged);
        }
        for record in staged {
            state.districts.insert(record.id.clone(), record);
        }
        state.batches_committed += 1;
        state.writes += writes.len();
        Ok(())
    }

    async fn list_districts(&self) -> Result<Vec<DistrictRecord>, StoreError> {
        Ok(self.state.lock().await.districts.values().cloned().collect())
    }

    async fn put_summary(&self, summary: &StatewideSummary) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.summary = Some(summary.clone());
        state.writes += 1;
        Ok(())
    }

    async fn put_insights(&self, report: &InsightReport) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.insights = Some(report.clone());
        state.writes += 1;
        Ok(())
    }

    async fn put_historical(&self, point: &HistoricalDataPoint) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.historical.insert(point.id.clone(), point.clone());
        state.writes += 1;
        Ok(())
    }

    async fn summary(&self) -> Result<Option<StatewideSummary>, StoreError> {
        Ok(self.state.lock().await.summary.clone())
    }

    async fn insights(&self) -> Result<Option<InsightReport>, StoreError> {
        Ok(self.state.lock().await.insights.clone())
    }

    async fn historical(&self) -> Result<Vec<HistoricalDataPoint>, StoreError> {
        Ok(self.state.lock().await.historical.values().cloned().collect())
    }
}

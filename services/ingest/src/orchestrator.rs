//! Ingestion orchestrator.
//!
//! Wires parser, normalizer, upsert engine and aggregation together for the
//! three entry points: an uploaded file, the daily insight regeneration and
//! the monthly historical roll-up. No numeric work happens here.

use crate::aggregate::{self, Aggregates};
use crate::bucket::{BucketLayout, ReportBucket};
use crate::error::{BucketError, IngestError, StoreError};
use crate::model::{DistrictRecord, HistoricalDataPoint, MonthKey};
use crate::normalize::{normalize_batch, ZonePolicy};
use crate::store::MetricsStore;
use crate::tabular::{parse_report, ReportFormat};
use crate::upsert::{dedupe_by_id, upsert_batch, UpsertReport, DEFAULT_BATCH_LIMIT};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error as _;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub batch_limit: usize,
    pub zone_policy: ZonePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            zone_policy: ZonePolicy::Unassigned,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Processed,
    /// No row survived normalization; nothing was written.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub rows_parsed: usize,
    pub rows_rejected: usize,
    pub upsert: UpsertReport,
    pub historical: Option<HistoricalDataPoint>,
}

/// The store-facing half of the pipeline.
pub struct Pipeline<S: ?Sized> {
    store: Arc<S>,
    settings: PipelineSettings,
}

impl<S: ?Sized> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings,
        }
    }
}

impl<S> Pipeline<S>
where
    S: MetricsStore + ?Sized,
{
    pub fn new(store: Arc<S>, settings: PipelineSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    /// Parse, normalize, upsert and re-aggregate one report. A historical
    /// point is written only when `month` is given.
    pub async fn ingest(
        &self,
        filename: &str,
        bytes: &[u8],
        month: Option<MonthKey>,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, IngestError> {
        let rows = parse_report(filename, bytes)?;
        let normalized = normalize_batch(&rows, self.settings.zone_policy);
        let mut report = IngestReport {
            status: IngestStatus::Empty,
            rows_parsed: rows.len(),
            rows_rejected: normalized.rejected.len(),
            upsert: UpsertReport::default(),
            historical: None,
        };

        if normalized.records.is_empty() {
            warn!(
                filename,
                rows = report.rows_parsed,
                rejected = report.rows_rejected,
                "no valid rows, nothing written"
            );
            return Ok(report);
        }

        let records = dedupe_by_id(normalized.records);
        report.upsert = upsert_batch(
            self.store(),
            records.clone(),
            now,
            self.settings.batch_limit,
        )
        .await?;

        aggregate::refresh_derived(self.store(), now).await?;

        if let Some(month) = month {
            report.historical = aggregate::record_history(self.store(), month, &records).await?;
        }

        report.status = IngestStatus::Processed;
        Ok(report)
    }

    /// Daily path: recompute summary and insights from the whole store.
    pub async fn regenerate_insights(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<Aggregates>, StoreError> {
        let result = aggregate::refresh_derived(self.store(), now).await?;
        if result.is_none() {
            info!("no districts stored, insight regeneration skipped");
        }
        Ok(result)
    }

    /// Monthly path: historical point for `month`, computed over the
    /// districts last written during that month.
    pub async fn aggregate_month(
        &self,
        month: MonthKey,
    ) -> Result<Option<HistoricalDataPoint>, StoreError> {
        let batch: Vec<DistrictRecord> = self
            .store
            .list_districts()
            .await?
            .into_iter()
            .filter(|d| month.contains(d.last_updated))
            .collect();

        if batch.is_empty() {
            info!(%month, "no districts updated in month, historical aggregation skipped");
            return Ok(None);
        }

        aggregate::record_history(self.store(), month, &batch).await
    }
}

/// A file landed in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    pub path: String,
    /// Reporting month for the historical point, when the uploader knows it.
    pub month: Option<MonthKey>,
}

impl UploadEvent {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            month: None,
        }
    }

    pub fn with_month(mut self, month: MonthKey) -> Self {
        self.month = Some(month);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Not under the incoming prefix.
    Ignored,
    Unsupported { moved_to: String },
    Empty { moved_to: String },
    Processed { moved_to: String, report: IngestReport },
    Failed { moved_to: String, error: String },
}

impl UploadOutcome {
    pub fn moved_to(&self) -> Option<&str> {
        match self {
            UploadOutcome::Ignored => None,
            UploadOutcome::Unsupported { moved_to }
            | UploadOutcome::Empty { moved_to }
            | UploadOutcome::Processed { moved_to, .. }
            | UploadOutcome::Failed { moved_to, .. } => Some(moved_to),
        }
    }
}

/// Full error chain on one line.
fn error_chain(err: &IngestError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

pub struct UploadHandler<S: ?Sized, B> {
    pipeline: Pipeline<S>,
    bucket: B,
    layout: BucketLayout,
}

impl<S, B> UploadHandler<S, B>
where
    S: MetricsStore + ?Sized,
    B: ReportBucket,
{
    pub fn new(pipeline: Pipeline<S>, bucket: B, layout: BucketLayout) -> Self {
        Self {
            pipeline,
            bucket,
            layout,
        }
    }

    pub fn pipeline(&self) -> &Pipeline<S> {
        &self.pipeline
    }

    pub fn bucket(&self) -> &B {
        &self.bucket
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    /// Run one uploaded file through the pipeline and file it away. Only
    /// bucket failures are returned; everything else is an outcome.
    pub async fn handle(
        &self,
        event: &UploadEvent,
        now: DateTime<Utc>,
    ) -> Result<UploadOutcome, BucketError> {
        let span = info_span!("upload", run_id = %Uuid::new_v4(), path = %event.path);
        self.handle_inner(event, now).instrument(span).await
    }

    async fn handle_inner(
        &self,
        event: &UploadEvent,
        now: DateTime<Utc>,
    ) -> Result<UploadOutcome, BucketError> {
        let Some(name) = self.layout.incoming_name(&event.path) else {
            info!("not an incoming report, ignored");
            return Ok(UploadOutcome::Ignored);
        };

        if ReportFormat::detect(name).is_none() {
            let moved_to = self.layout.unsupported_path(name);
            self.bucket.rename(&event.path, &moved_to).await?;
            warn!(%moved_to, "unsupported report format");
            return Ok(UploadOutcome::Unsupported { moved_to });
        }

        let bytes = self.bucket.read(&event.path).await?;
        info!(bytes = bytes.len(), month = ?event.month.map(|m| m.to_string()), "processing report");

        match self.pipeline.ingest(name, &bytes, event.month, now).await {
            Ok(report) if report.status == IngestStatus::Empty => {
                let moved_to = self.layout.empty_path(name);
                self.bucket.rename(&event.path, &moved_to).await?;
                Ok(UploadOutcome::Empty { moved_to })
            }
            Ok(report) => {
                let moved_to = self.layout.processed_path(name);
                self.bucket.rename(&event.path, &moved_to).await?;
                info!(
                    %moved_to,
                    written = report.upsert.written,
                    rejected = report.rows_rejected,
                    "report processed"
                );
                Ok(UploadOutcome::Processed { moved_to, report })
            }
            Err(IngestError::UnsupportedFormat { .. }) => {
                let moved_to = self.layout.unsupported_path(name);
                self.bucket.rename(&event.path, &moved_to).await?;
                Ok(UploadOutcome::Unsupported { moved_to })
            }
            Err(err) => {
                let error = error_chain(&err);
                let moved_to = self.layout.error_path(name);
                error!(%error, %moved_to, "report failed");
                self.bucket.rename(&event.path, &moved_to).await?;
                Ok(UploadOutcome::Failed { moved_to, error })
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

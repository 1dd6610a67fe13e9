//! Report ingestion and statistics pipeline for the district performance
//! dashboard.
//!
//! Uploaded CSV/XLSX reports are parsed into raw rows, normalized into
//! per-district metrics, merged into the store, and rolled up into the
//! statewide summary, insight report and monthly history.

pub mod aggregate;
pub mod bucket;
pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod store;
pub mod tabular;
pub mod triggers;
pub mod upsert;

pub use bucket::{BucketLayout, FsBucket, ReportBucket};
pub use config::{init_tracing, Config};
pub use error::{BucketError, IngestError, StoreError};
pub use orchestrator::{
    IngestReport, IngestStatus, Pipeline, PipelineSettings, UploadEvent, UploadHandler,
    UploadOutcome,
};
pub use store::{MemoryStore, MetricsStore, PgStore};

use thiserror::Error;

/// File-level failures. Each one ends the pipeline for that file.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported report format: {filename}")]
    UnsupportedFormat { filename: String },

    #[error("failed to parse {filename}: {source}")]
    Parse {
        filename: String,
        #[source]
        source: ParseFailure,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("xlsx: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("workbook has no sheets")]
    NoSheets,
}

/// Row-level rejection. Logged and absorbed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowRejection {
    #[error("missing or invalid district name")]
    MissingDistrictName,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A sub-batch failed after `committed` records were already applied.
    #[error("batch {batch} failed after {committed} records were committed: {source}")]
    PartialBatch {
        batch: usize,
        committed: usize,
        #[source]
        source: Box<StoreError>,
    },
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid object path: {0}")]
    InvalidPath(String),
}

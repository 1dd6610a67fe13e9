use crate::upsert::DEFAULT_BATCH_LIMIT;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Process settings shared by the ingest, uploader and api binaries.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: Option<String>,
    pub reports_dir: PathBuf,
    pub batch_limit: usize,
    pub watch_interval: Duration,
    pub api_bind: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            db_url: var("DB_URL"),
            reports_dir: PathBuf::from(
                var("REPORTS_DIR").unwrap_or_else(|| "./data/reports".to_string()),
            ),
            batch_limit: var("UPSERT_BATCH_LIMIT")
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_BATCH_LIMIT),
            watch_interval: Duration::from_secs(
                var("WATCH_INTERVAL_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            api_bind: var("API_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
        }
    }

    pub fn db_url(&self) -> Result<&str> {
        self.db_url.as_deref().context("DB_URL env var missing")
    }
}

/// Structured logging to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

//! Uploader Service - Places district reports into the incoming bucket
//!
//! Responsibilities:
//! - Accept a local file or download one from a URL
//! - Reject anything that is not a spreadsheet report
//! - Name the upload `<unix-millis>-<file name>` so repeated uploads never clash
//! - Log the content hash for auditing
//!
//! Usage:
//!   # Local file:
//!   cargo run --bin uploader -- --file ./reports/june.xlsx
//!
//!   # Download first:
//!   cargo run --bin uploader -- --url https://example.org/june.csv

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use ingest::bucket::{BucketLayout, FsBucket, ReportBucket};
use ingest::{init_tracing, Config};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Extensions the upload form accepts. `.xls` is accepted here but is filed
/// as unsupported by the ingest service.
const ACCEPTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls"];

#[derive(Parser, Debug)]
#[command(name = "uploader", about = "Uploads district reports for ingestion")]
struct Args {
    /// Local report to upload
    #[arg(long, conflicts_with = "url")]
    file: Option<PathBuf>,

    /// URL to download the report from
    #[arg(long)]
    url: Option<String>,

    /// Override the file name (defaults to the file or URL's last segment)
    #[arg(long)]
    name: Option<String>,

    /// Validate and hash only; don't write to the bucket
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

/// Keep only the last path segment and drop any query string.
fn base_name(raw: &str) -> Option<String> {
    let no_query = raw.split(['?', '#']).next().unwrap_or(raw);
    let name = no_query
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")?;
    Some(name.to_string())
}

fn is_accepted(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false)
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

fn upload_name(millis: i64, name: &str) -> String {
    format!("{}-{}", millis, name)
}

/// Fetch a report over HTTP.
async fn download(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    info!(%url, "downloading report");
    let resp = client
        .get(url)
        .send()
        .await?
        .error_for_status()
        .context("HTTP request failed")?;
    let bytes = resp.bytes().await?;
    Ok(bytes.to_vec())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env();

    let (source, bytes) = match (&args.file, &args.url) {
        (Some(path), _) => {
            let bytes = fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            (path.display().to_string(), bytes)
        }
        (None, Some(url)) => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .user_agent("SamarthUploader/1.0")
                .build()?;
            (url.clone(), download(&client, url).await?)
        }
        (None, None) => anyhow::bail!("Must specify either --file <path> or --url <url>"),
    };

    let name = match &args.name {
        Some(name) => base_name(name),
        None => base_name(&source),
    }
    .context("Could not determine a file name for the report")?;

    if !is_accepted(&name) {
        anyhow::bail!(
            "{} is not a supported report; expected one of: {}",
            name,
            ACCEPTED_EXTENSIONS.join(", ")
        );
    }

    let hash = content_hash(&bytes);
    let layout = BucketLayout::default();
    let key = layout.incoming_path(&upload_name(Utc::now().timestamp_millis(), &name));
    info!(%source, %key, bytes = bytes.len(), %hash, "report ready");

    if args.dry_run {
        info!("dry run, nothing uploaded");
        return Ok(());
    }

    let bucket = FsBucket::new(&config.reports_dir);
    bucket
        .write(&key, &bytes)
        .await
        .with_context(|| format!("Failed to upload {}", key))?;
    info!(%key, root = %config.reports_dir.display(), "report uploaded");
    println!("{}", key);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("./reports/june.xlsx").as_deref(), Some("june.xlsx"));
        assert_eq!(
            base_name("https://example.org/files/june.csv?token=abc").as_deref(),
            Some("june.csv")
        );
        assert_eq!(base_name("C:\\reports\\june.csv").as_deref(), Some("june.csv"));
        assert_eq!(base_name("https://example.org/"), None);
        assert_eq!(base_name(".."), None);
    }

    #[test]
    fn test_accepted_extensions() {
        assert!(is_accepted("june.csv"));
        assert!(is_accepted("JUNE.XLSX"));
        assert!(is_accepted("legacy.xls"));
        assert!(!is_accepted("june.pdf"));
        assert!(!is_accepted("csv"));
    }

    #[test]
    fn test_upload_name_lands_in_incoming() {
        let key = BucketLayout::default().incoming_path(&upload_name(1718000000000, "june.csv"));
        assert_eq!(key, "incoming_reports/1718000000000-june.csv");
        assert_eq!(
            BucketLayout::default().incoming_name(&key),
            Some("1718000000000-june.csv")
        );
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

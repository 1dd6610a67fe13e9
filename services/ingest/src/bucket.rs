//! Report bucket: where uploaded files land and where they are filed once a
//! run has finished with them.

use crate::error::BucketError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

pub const INCOMING_PREFIX: &str = "incoming_reports/";
pub const PROCESSED_PREFIX: &str = "processed_reports/";
pub const ERROR_PREFIX: &str = "error_reports/";

#[async_trait]
pub trait ReportBucket: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>, BucketError>;
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), BucketError>;
    /// Move an object, replacing anything already at `to`.
    async fn rename(&self, from: &str, to: &str) -> Result<(), BucketError>;
    /// Object paths under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BucketError>;
}

/// Where each kind of outcome is filed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLayout {
    pub incoming: String,
    pub processed: String,
    pub errors: String,
}

impl Default for BucketLayout {
    fn default() -> Self {
        Self {
            incoming: INCOMING_PREFIX.to_string(),
            processed: PROCESSED_PREFIX.to_string(),
            errors: ERROR_PREFIX.to_string(),
        }
    }
}

impl BucketLayout {
    /// Base name of `path` if it sits directly under the incoming prefix.
    pub fn incoming_name<'a>(&self, path: &'a str) -> Option<&'a str> {
        let name = path.strip_prefix(self.incoming.as_str())?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(name)
    }

    pub fn incoming_path(&self, name: &str) -> String {
        format!("{}{}", self.incoming, name)
    }

    pub fn processed_path(&self, name: &str) -> String {
        format!("{}{}", self.processed, name)
    }

    pub fn unsupported_path(&self, name: &str) -> String {
        format!("{}unsupported_{}", self.processed, name)
    }

    pub fn empty_path(&self, name: &str) -> String {
        format!("{}empty_{}", self.processed, name)
    }

    pub fn error_path(&self, name: &str) -> String {
        format!("{}{}", self.errors, name)
    }
}

/// Bucket backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsBucket {
    root: PathBuf,
}

impl FsBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, BucketError> {
        let rel = Path::new(key);
        let clean = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(BucketError::InvalidPath(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BucketError + '_ {
    move |source| BucketError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn ensure_parent(path: &Path) -> Result<(), BucketError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    Ok(())
}

#[async_trait]
impl ReportBucket for FsBucket {
    async fn read(&self, path: &str) -> Result<Vec<u8>, BucketError> {
        let full = self.resolve(path)?;
        fs::read(&full).await.map_err(io_err(&full))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), BucketError> {
        let full = self.resolve(path)?;
        ensure_parent(&full).await?;
        fs::write(&full, bytes).await.map_err(io_err(&full))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), BucketError> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        ensure_parent(&dst).await?;
        fs::rename(&src, &dst).await.map_err(io_err(&src))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BucketError> {
        let dir_key = prefix.trim_end_matches('/');
        let dir = self.resolve(dir_key)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
            let file_type = entry.file_type().await.map_err(io_err(&dir))?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            keys.push(format!("{}/{}", dir_key, name));
        }
        keys.sort();
        Ok(keys)
    }
}

// =============================================================================
// TESTS
// =============================================================================

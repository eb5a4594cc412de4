//! Blob storage port for uploaded and generated CV files.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

pub mod s3;

pub use s3::S3BlobStorage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("S3 error: {0}")]
    S3(String),
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores `data` under `{folder}/{uuid}-{filename}`.
    async fn put(
        &self,
        data: Bytes,
        content_type: &str,
        folder: &str,
        filename: &str,
    ) -> Result<StoredObject, StorageError>;

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Keeps letters, digits, dots, dashes and underscores; everything else
/// becomes `_`. Falls back to `file` for empty names.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

pub fn object_key(folder: &str, filename: &str) -> String {
    format!(
        "{}/{}-{}",
        folder.trim_matches('/'),
        uuid::Uuid::new_v4(),
        sanitize_filename(filename)
    )
}

//! Blob store seam.
//!
//! Keys are content-addressed by report and stage, and write-once: a stage
//! never overwrites a blob, so concurrent readers never race a writer.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{PipelineError, Result};

/// Object storage for report bodies.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads `bytes` under `key` and returns the blob URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the key already holds different content;
    /// re-uploading identical bytes is allowed (redelivery).
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<String>;

    /// Downloads the blob at `url`.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// In-memory blob store for tests and local runs. URLs are `mem://<key>`.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let mut blobs = self.blobs.write().await;
        if let Some(existing) = blobs.get(key) {
            if existing != bytes {
                return Err(PipelineError::blob(format!(
                    "key {key} already holds different content"
                )));
            }
        } else {
            blobs.insert(key.to_string(), bytes.to_vec());
        }
        Ok(format!("mem://{key}"))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let key = url
            .strip_prefix("mem://")
            .ok_or_else(|| PipelineError::blob(format!("unsupported blob url {url}")))?;
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::blob(format!("blob not found: {url}")))
    }
}

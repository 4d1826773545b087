//! Object storage for staged page images.
//!
//! The reasoning service fetches page images by URL, so every page is
//! uploaded first and handed over as a time-limited, read-only link.
//! [`ObjectStore`] is the seam: [`AzureBlobStore`] talks to Azure Blob
//! Storage with SAS signing, [`MemoryStore`] keeps objects in process for
//! tests and offline runs.
//!
//! Uploads are idempotent per key. Re-staging the same page overwrites the
//! previous object rather than creating a second one.

mod azure;
mod memory;

pub use azure::AzureBlobStore;
pub use memory::MemoryStore;

use crate::error::AuditError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Attempt budget for transient storage failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Backoff grows linearly: `base_backoff_ms * attempt`.
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 200,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short identifier for logs (`azure-blob`, `memory`).
    fn backend_tag(&self) -> &'static str;

    /// Upload `bytes` under `key`, replacing any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<(), AuditError>;

    /// Read-only URL for `key` that stops working at `expires_at`.
    fn signed_url(&self, key: &str, expires_at: DateTime<Utc>) -> Result<String, AuditError>;
}

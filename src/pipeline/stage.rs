//! Staging: upload page images and mint their read-only URLs.
//!
//! Uploads run with bounded concurrency and complete in any order; the
//! returned artifacts are sorted back into page order before anyone sees
//! them. Any single failed upload fails the whole document.

use crate::error::AuditError;
use crate::model::{PageImage, StagedArtifact};
use crate::pipeline::encode::encode_png;
use crate::progress::ProgressCallback;
use crate::store::ObjectStore;
use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

/// Upper bound on URL lifetime: seven days.
const MAX_TTL_SECS: u64 = 7 * 24 * 3600;

/// Upload `pages` to `store` and return one artifact per page, in page order.
///
/// Every URL shares the same expiry, `now + ttl_secs` (capped at seven
/// days), fixed before the first upload starts.
pub async fn stage_pages(
    store: &dyn ObjectStore,
    pages: Vec<PageImage>,
    ttl_secs: u64,
    concurrency: usize,
    progress: Option<&ProgressCallback>,
) -> Result<Vec<StagedArtifact>, AuditError> {
    let total = pages.len();
    let expires_at = Utc::now() + Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64);

    let mut staged: Vec<StagedArtifact> = stream::iter(pages.into_iter().map(|page| async move {
        let key = page.storage_key();
        let bytes = encode_png(&page)?;
        store.put(&key, bytes, "image/png").await?;
        let url = store.signed_url(&key, expires_at)?;
        if let Some(cb) = progress {
            cb.on_page_staged(page.role, page.page, total);
        }
        let artifact = StagedArtifact {
            role: page.role,
            page: page.page,
            key,
            url,
            expires_at,
        };
        debug!("Staged {} → {}", artifact.key, artifact.redacted_url());
        Ok::<_, AuditError>(artifact)
    }))
    .buffer_unordered(concurrency.max(1))
    .try_collect()
    .await?;

    staged.sort_by_key(|a| a.page);
    info!(
        "Staged {} page(s) to {} (expires {})",
        staged.len(),
        store.backend_tag(),
        expires_at
    );
    Ok(staged)
}

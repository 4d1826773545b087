//! Input resolution: turn a user-supplied path or URL into a [`SourceDocument`].
//!
//! The content type is sniffed from magic bytes first and only falls back
//! to the file extension when the bytes are inconclusive. Uploads are often
//! misnamed (a scanned PDF saved as `.png`), and the rasteriser needs the
//! real type, not the claimed one.

use crate::error::AuditError;
use crate::model::{ContentType, Role, SourceDocument};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Decide a content type from the leading bytes, then the name's extension.
pub fn detect_content_type(bytes: &[u8], name: Option<&str>) -> Option<ContentType> {
    if bytes.starts_with(PDF_MAGIC) {
        return Some(ContentType::Pdf);
    }
    if bytes.starts_with(PNG_MAGIC) || bytes.starts_with(JPEG_MAGIC) {
        return Some(ContentType::Image);
    }

    let ext = name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "pdf" => Some(ContentType::Pdf),
        "jpg" | "jpeg" | "png" => Some(ContentType::Image),
        _ => None,
    }
}

/// Wrap in-memory bytes as a [`SourceDocument`], detecting the content type.
pub fn source_from_bytes(
    bytes: Vec<u8>,
    name: Option<&str>,
    role: Role,
) -> Result<SourceDocument, AuditError> {
    if bytes.is_empty() {
        return Err(AuditError::UnsupportedFormat {
            role,
            detail: "input is empty".into(),
        });
    }
    let content_type =
        detect_content_type(&bytes, name).ok_or_else(|| AuditError::UnsupportedFormat {
            role,
            detail: format!(
                "unrecognised file type{}",
                name.map(|n| format!(" for '{n}'")).unwrap_or_default()
            ),
        })?;
    debug!(
        "{} document: {:?}, {} bytes",
        role,
        content_type,
        bytes.len()
    );
    Ok(SourceDocument::new(bytes, content_type, role))
}

/// Resolve a local path or HTTP(S) URL to a [`SourceDocument`].
pub async fn load_source(
    input: &str,
    role: Role,
    timeout_secs: u64,
) -> Result<SourceDocument, AuditError> {
    if is_url(input) {
        let bytes = download_url(input, timeout_secs).await?;
        let name = reqwest::Url::parse(input)
            .ok()
            .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_owned)));
        source_from_bytes(bytes, name.as_deref(), role)
    } else {
        let bytes = read_local(input).await?;
        source_from_bytes(bytes, Some(input), role)
    }
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, AuditError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read local input: {}", path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AuditError::FileNotFound { path })
        }
        Err(e) => Err(AuditError::Internal(format!(
            "failed to read '{}': {e}",
            path.display()
        ))),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, AuditError> {
    info!("Downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AuditError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AuditError::DownloadFailed {
            url: url.to_string(),
            reason: if e.is_timeout() {
                format!("timed out after {timeout_secs}s")
            } else {
                e.to_string()
            },
        })?;

    if !response.status().is_success() {
        return Err(AuditError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AuditError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

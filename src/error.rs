//! Error types for the payshield library.
//!
//! Every stage of the audit pipeline fails fast: the first error stops the
//! audit and is returned as an [`AuditError`]. There is no partial-success
//! audit, so unlike a page-by-page converter there is no second, non-fatal
//! error type. The one "soft" outcome, a response with no table in it, is
//! modelled as `Option::None` by the table extractor and never reaches here.
//!
//! [`AuditError::kind`] collapses the variants into the small [`ErrorKind`]
//! taxonomy callers branch on. Only [`ErrorKind::ServiceUnavailable`] is a
//! candidate for a caller-level retry; the core itself never retries a
//! service call.

use crate::model::Role;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the payshield library.
#[derive(Debug, Error)]
pub enum AuditError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The document bytes could not be decoded as a PDF or a raster image.
    #[error("Unsupported {role} document: {detail}\nUpload a PDF, JPEG or PNG file.")]
    UnsupportedFormat { role: Role, detail: String },

    /// The paginated document decoded fine but has no pages.
    #[error("The {role} document has no pages")]
    EmptyDocument { role: Role },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for {role} page {page}: {detail}")]
    RasterisationFailed {
        role: Role,
        page: usize,
        detail: String,
    },

    // ── Staging errors ────────────────────────────────────────────────────
    /// Upload did not complete after the store's retry policy was exhausted.
    #[error("Object storage unavailable while staging '{key}': {detail}")]
    StorageUnavailable { key: String, detail: String },

    /// Signing credentials were rejected or could not be used.
    #[error("Object storage denied access: {detail}\nCheck the storage account key.")]
    PermissionDenied { detail: String },

    /// A staged URL passed its expiry before the request was submitted.
    #[error("Staged artifact '{key}' expired before it was used")]
    ArtifactExpired { key: String },

    // ── Service errors ────────────────────────────────────────────────────
    /// Transient failure talking to the reasoning service (connectivity,
    /// rate limiting, timeout, 5xx). The caller may retry.
    #[error("Audit service unavailable: {detail}")]
    ServiceUnavailable { detail: String },

    /// The service refused the request (malformed, content policy,
    /// authentication). Retrying the same request will not help.
    #[error("Audit service rejected the request{}: {detail}", http_suffix(.status))]
    ServiceRejected { status: Option<u16>, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Report or CSV generation failed.
    #[error("Failed to render {artifact}: {detail}")]
    RenderFailed {
        artifact: &'static str,
        detail: String,
    },

    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDF inputs are rasterised with PDFium. Either:\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium, or\n\
  • Place libpdfium next to the working directory, or\n\
  • Install libpdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Coarse failure taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    /// Bad or undecodable input. The user must re-upload.
    UnsupportedFormat,
    /// Zero-page document.
    EmptyDocument,
    /// Staging failed after the store's own retries.
    StorageUnavailable,
    /// Signing credentials are invalid.
    PermissionDenied,
    /// Transient reasoning-service failure.
    ServiceUnavailable,
    /// Permanent reasoning-service failure.
    ServiceRejected,
    /// Configuration, output or internal failure.
    Other,
}

impl AuditError {
    /// Map this error onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::FileNotFound { .. }
            | AuditError::DownloadFailed { .. }
            | AuditError::UnsupportedFormat { .. }
            | AuditError::RasterisationFailed { .. } => ErrorKind::UnsupportedFormat,
            AuditError::EmptyDocument { .. } => ErrorKind::EmptyDocument,
            AuditError::StorageUnavailable { .. } | AuditError::ArtifactExpired { .. } => {
                ErrorKind::StorageUnavailable
            }
            AuditError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            AuditError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            AuditError::ServiceRejected { .. } => ErrorKind::ServiceRejected,
            AuditError::RenderFailed { .. }
            | AuditError::OutputWriteFailed { .. }
            | AuditError::InvalidConfig(_)
            | AuditError::PdfiumBindingFailed(_)
            | AuditError::Internal(_) => ErrorKind::Other,
        }
    }

    /// Whether the caller may reasonably retry the whole audit.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ServiceUnavailable
    }
}

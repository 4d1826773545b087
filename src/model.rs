//! Data model shared by the pipeline stages.
//!
//! Values flow strictly forward: a [`SourceDocument`] becomes one or more
//! [`PageImage`]s, each page becomes a [`StagedArtifact`], the artifacts are
//! assembled into an [`AuditRequest`], and the service answers with an
//! [`AuditResult`]. Nothing here is shared mutable state; each audit owns its
//! values from start to finish.

use crate::error::AuditError;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

// ── Roles and content types ──────────────────────────────────────────────

/// Which side of the audit a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Purchase order or labor agreement: the contracted rates.
    Po,
    /// Invoice or timesheet: the billed rates and hours.
    Invoice,
}

impl Role {
    /// Prefix used in storage keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Po => "po",
            Role::Invoice => "invoice",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Paginated document (PDF).
    Pdf,
    /// Single raster image (JPEG or PNG).
    Image,
}

// ── Source documents and pages ───────────────────────────────────────────

/// Raw bytes of one uploaded document. Immutable once constructed.
#[derive(Clone)]
pub struct SourceDocument {
    bytes: Vec<u8>,
    content_type: ContentType,
    role: Role,
}

impl SourceDocument {
    pub fn new(bytes: Vec<u8>, content_type: ContentType, role: Role) -> Self {
        Self {
            bytes,
            content_type,
            role,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, ContentType, Role) {
        (self.bytes, self.content_type, self.role)
    }
}

impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDocument")
            .field("role", &self.role)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One rasterised page, normalised to 8-bit RGB.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub role: Role,
    /// 1-based position within the source document.
    pub page: usize,
    /// Content type of the document this page came from. Decides the
    /// storage key shape.
    pub source: ContentType,
    pub image: DynamicImage,
}

impl PageImage {
    /// Deterministic object key: `{role}_page_{n}.png` for pages of a
    /// paginated document, `{role}_img.png` for a standalone image.
    pub fn storage_key(&self) -> String {
        match self.source {
            ContentType::Pdf => format!("{}_page_{}.png", self.role, self.page),
            ContentType::Image => format!("{}_img.png", self.role),
        }
    }
}

/// A page uploaded to object storage together with its read-only URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    pub role: Role,
    pub page: usize,
    pub key: String,
    /// Signed, read-only fetch URL. Invalid after `expires_at`.
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl StagedArtifact {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Fail with [`AuditError::ArtifactExpired`] if the URL is no longer usable.
    pub fn ensure_fresh(&self, now: DateTime<Utc>) -> Result<(), AuditError> {
        if self.is_expired_at(now) {
            return Err(AuditError::ArtifactExpired {
                key: self.key.clone(),
            });
        }
        Ok(())
    }

    /// URL with the query string (signature) removed, for logs.
    pub fn redacted_url(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

// ── Request and result ───────────────────────────────────────────────────

/// One element of the multimodal request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ContentBlock {
    Text(String),
    /// Fetchable image URL.
    Image(String),
}

impl ContentBlock {
    pub fn is_text(&self) -> bool {
        matches!(self, ContentBlock::Text(_))
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentBlock::Image(_))
    }
}

/// The ordered request sent to the reasoning service.
///
/// The instruction always goes first on the wire; `blocks` holds the
/// document section that follows it: the purchase-order label and pages,
/// then the invoice label and pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRequest {
    pub instruction: String,
    pub blocks: Vec<ContentBlock>,
}

impl AuditRequest {
    /// Every block in wire order, instruction included.
    pub fn content(&self) -> impl Iterator<Item = ContentBlock> + '_ {
        std::iter::once(ContentBlock::Text(self.instruction.clone()))
            .chain(self.blocks.iter().cloned())
    }

    pub fn text_block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_text()).count()
    }

    pub fn image_block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_image()).count()
    }

    pub fn image_urls(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::Image(url) => Some(url.as_str()),
            ContentBlock::Text(_) => None,
        })
    }
}

/// Raw text answer from the reasoning service. Opaque: consumers reparse it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditResult {
    text: String,
}

impl AuditResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

// ── Extracted table ──────────────────────────────────────────────────────

/// A pipe table pulled out of an [`AuditResult`].
///
/// Every row in `rows` has exactly `headers.len()` cells: short rows are
/// padded with empty cells and long rows truncated at extraction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Data rows whose original cell count differed from the header.
    pub reshaped_rows: usize,
}

impl AuditTable {
    pub fn row(&self, index: usize) -> Option<AuditRow<'_>> {
        self.rows.get(index).map(|cells| AuditRow {
            headers: &self.headers,
            cells,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = AuditRow<'_>> {
        self.rows.iter().map(|cells| AuditRow {
            headers: &self.headers,
            cells,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Column-name view over one data row, in header order.
#[derive(Debug, Clone, Copy)]
pub struct AuditRow<'a> {
    headers: &'a [String],
    cells: &'a [String],
}

impl<'a> AuditRow<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|i| self.cells.get(i))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.cells.iter().map(String::as_str))
    }
}

// ── Audit outcome ────────────────────────────────────────────────────────

/// Everything an audit produces.
#[derive(Debug, Clone, Serialize)]
pub struct AuditOutcome {
    pub result: AuditResult,
    /// `None` when the response carried no pipe table.
    pub table: Option<AuditTable>,
    /// Printable PDF report.
    #[serde(skip)]
    pub report_pdf: Vec<u8>,
    /// CSV export of `table`, present iff a table was found.
    #[serde(skip)]
    pub csv: Option<Vec<u8>>,
    /// Serialised with [`StagedArtifact::redacted_url`]; signatures stay in memory.
    #[serde(serialize_with = "serialize_redacted")]
    pub staged: Vec<StagedArtifact>,
    pub stats: AuditStats,
}

fn serialize_redacted<S: Serializer>(
    staged: &[StagedArtifact],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(staged.iter().map(|a| StagedArtifact {
        url: a.redacted_url().to_string(),
        ..a.clone()
    }))
}

/// Timings and counts for one audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub po_pages: usize,
    pub invoice_pages: usize,
    pub rasterise_duration_ms: u64,
    pub stage_duration_ms: u64,
    pub service_duration_ms: u64,
    pub total_duration_ms: u64,
    pub table_rows: usize,
}

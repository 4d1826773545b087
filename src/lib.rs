//! # payshield
//!
//! Audit a purchase order against an invoice with a multimodal model.
//!
//! ## Why this crate?
//!
//! Labor invoices and the agreements behind them arrive as scans, phone
//! photos and PDFs with rate tables in small print. Rather than OCR them and
//! reconcile text, this crate renders every page to an image, stages the
//! images behind expiring URLs, and lets a vision model read both documents
//! side by side. The model's answer (a comparison table plus a summary) is
//! turned into a printable PDF report and a CSV of the table.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PO + invoice
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Rasterize  one RGB image per page (pdfium, spawn_blocking)
//!  ├─ 3. Stage      PNG upload + signed read-only URL per page
//!  ├─ 4. Request    instruction, labels, image URLs in page order
//!  ├─ 5. Service    one chat-completions call, no retries
//!  └─ 6. Artifacts  pipe-table extraction → CSV, raw answer → PDF report
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use payshield::{audit_files, AuditConfig, AzureBlobStore, ChatCompletionsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuditConfig::default();
//!     let store = AzureBlobStore::from_env()?;
//!     let service = ChatCompletionsClient::from_env(&config)?;
//!
//!     let outcome = audit_files("po.pdf", "invoice.jpg", &config, &store, &service).await?;
//!     println!("{}", outcome.result.as_str());
//!     if let Some(table) = &outcome.table {
//!         eprintln!("{} table row(s)", table.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `payshield` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod audit;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;

#[cfg(test)]
mod test_http;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use audit::{
    audit_files, export_artifacts, run_audit, write_artifacts, ExportedArtifacts,
    CSV_FILE_NAME, REPORT_FILE_NAME, RESULT_FILE_NAME,
};
pub use config::{AuditConfig, AuditConfigBuilder};
pub use error::{AuditError, ErrorKind};
pub use model::{
    AuditOutcome, AuditRequest, AuditResult, AuditRow, AuditStats, AuditTable, ContentBlock,
    ContentType, PageImage, Role, SourceDocument, StagedArtifact,
};
pub use pipeline::service::{AuditService, ChatCompletionsClient};
pub use progress::{AuditProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{AzureBlobStore, MemoryStore, ObjectStore, RetryPolicy};

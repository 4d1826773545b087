//! End-to-end audit orchestration.
//!
//! [`run_audit`] drives the pipeline for two already-loaded documents;
//! [`audit_files`] adds input resolution on top. Both documents are
//! rasterised and staged concurrently and the first failure aborts the
//! whole audit. Already-uploaded pages are left to expire on their own.
//!
//! [`export_artifacts`] regenerates the report and CSV from a saved answer
//! without calling the service again, and [`write_artifacts`] puts them on
//! disk.

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::model::{
    AuditOutcome, AuditResult, AuditStats, AuditTable, Role, SourceDocument, StagedArtifact,
};
use crate::pipeline::service::AuditService;
use crate::pipeline::{input, rasterize, report, request, stage, table};
use crate::progress::ProgressCallback;
use crate::store::ObjectStore;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// File name of the printable report.
pub const REPORT_FILE_NAME: &str = "PayShield_Audit_Report.pdf";
/// File name of the table export.
pub const CSV_FILE_NAME: &str = "PayShield_Comparison.csv";
/// File name of the raw answer.
pub const RESULT_FILE_NAME: &str = "PayShield_Audit.md";

/// Report and table export derived from one [`AuditResult`].
#[derive(Debug, Clone)]
pub struct ExportedArtifacts {
    pub report_pdf: Vec<u8>,
    pub table: Option<AuditTable>,
    /// Present iff `table` is.
    pub csv: Option<Vec<u8>>,
}

/// Audit a purchase order against an invoice.
///
/// # Errors
/// Fails fast with the first error from any stage. Role mismatches
/// (an invoice passed as `po`) are rejected before any work starts.
pub async fn run_audit(
    po: SourceDocument,
    invoice: SourceDocument,
    config: &AuditConfig,
    store: &dyn ObjectStore,
    service: &dyn AuditService,
) -> Result<AuditOutcome, AuditError> {
    let total_start = Instant::now();
    if po.role() != Role::Po || invoice.role() != Role::Invoice {
        return Err(AuditError::InvalidConfig(format!(
            "expected (po, invoice) documents, got ({}, {})",
            po.role(),
            invoice.role()
        )));
    }
    let progress = config.progress_callback.as_ref();
    if let Some(cb) = progress {
        cb.on_audit_start();
    }
    info!("Starting audit via {}", store.backend_tag());

    // ── Rasterise + stage both documents ─────────────────────────────────
    let (po_prep, invoice_prep) = tokio::try_join!(
        prepare(po, config, store, progress),
        prepare(invoice, config, store, progress),
    )?;

    let now = Utc::now();
    for artifact in po_prep.staged.iter().chain(&invoice_prep.staged) {
        artifact.ensure_fresh(now)?;
    }

    // ── Request + service call ───────────────────────────────────────────
    let req = request::build_request(
        config.instruction_text(),
        &po_prep.staged,
        &invoice_prep.staged,
    )?;
    if let Some(cb) = progress {
        cb.on_service_call_start(req.image_block_count());
    }
    let service_start = Instant::now();
    let result = service.complete(&req).await?;
    let service_duration_ms = service_start.elapsed().as_millis() as u64;
    info!(
        "Audit service answered in {} ms ({} chars)",
        service_duration_ms,
        result.as_str().len()
    );

    // ── Artifacts ────────────────────────────────────────────────────────
    let exported = export_artifacts(&result)?;
    let table_rows = exported.table.as_ref().map_or(0, AuditTable::len);
    if let Some(cb) = progress {
        cb.on_audit_complete(exported.table.is_some());
    }

    let stats = AuditStats {
        po_pages: po_prep.pages,
        invoice_pages: invoice_prep.pages,
        rasterise_duration_ms: po_prep.rasterise_ms.max(invoice_prep.rasterise_ms),
        stage_duration_ms: po_prep.stage_ms.max(invoice_prep.stage_ms),
        service_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        table_rows,
    };
    info!(
        "Audit complete: {} + {} page(s), table rows: {}, total {} ms",
        stats.po_pages, stats.invoice_pages, stats.table_rows, stats.total_duration_ms
    );

    let mut staged = po_prep.staged;
    staged.extend(invoice_prep.staged);
    Ok(AuditOutcome {
        result,
        table: exported.table,
        report_pdf: exported.report_pdf,
        csv: exported.csv,
        staged,
        stats,
    })
}

/// Resolve both inputs (local paths or URLs), then [`run_audit`].
pub async fn audit_files(
    po_input: &str,
    invoice_input: &str,
    config: &AuditConfig,
    store: &dyn ObjectStore,
    service: &dyn AuditService,
) -> Result<AuditOutcome, AuditError> {
    let (po, invoice) = tokio::try_join!(
        input::load_source(po_input, Role::Po, config.download_timeout_secs),
        input::load_source(invoice_input, Role::Invoice, config.download_timeout_secs),
    )?;
    run_audit(po, invoice, config, store, service).await
}

/// Build the report and, when the answer holds a table, the CSV export.
pub fn export_artifacts(result: &AuditResult) -> Result<ExportedArtifacts, AuditError> {
    let report_pdf = report::render_report(result)?;
    let table = table::extract_table(result);
    let csv = match &table {
        Some(t) => Some(table::table_to_csv(t)?),
        None => {
            warn!("No structured table found for CSV export");
            None
        }
    };
    Ok(ExportedArtifacts {
        report_pdf,
        table,
        csv,
    })
}

/// Write the raw answer, the report and (if any) the CSV into `dir`.
///
/// Each file is written to a temporary sibling and renamed into place, so
/// a reader never sees a half-written artifact. Returns the written paths.
pub async fn write_artifacts(
    dir: &Path,
    result: &AuditResult,
    exported: &ExportedArtifacts,
) -> Result<Vec<PathBuf>, AuditError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AuditError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let mut written = Vec::with_capacity(3);
    written.push(write_atomic(&dir.join(RESULT_FILE_NAME), result.as_str().as_bytes()).await?);
    written.push(write_atomic(&dir.join(REPORT_FILE_NAME), &exported.report_pdf).await?);
    if let Some(csv) = &exported.csv {
        written.push(write_atomic(&dir.join(CSV_FILE_NAME), csv).await?);
    }
    Ok(written)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<PathBuf, AuditError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| AuditError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| AuditError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(path.to_path_buf())
}

struct Prepared {
    pages: usize,
    staged: Vec<StagedArtifact>,
    rasterise_ms: u64,
    stage_ms: u64,
}

async fn prepare(
    doc: SourceDocument,
    config: &AuditConfig,
    store: &dyn ObjectStore,
    progress: Option<&ProgressCallback>,
) -> Result<Prepared, AuditError> {
    let role = doc.role();

    let start = Instant::now();
    let pages = rasterize::rasterize(doc, config).await?;
    if pages.is_empty() {
        return Err(AuditError::EmptyDocument { role });
    }
    let rasterise_ms = start.elapsed().as_millis() as u64;
    let page_count = pages.len();
    if let Some(cb) = progress {
        cb.on_document_rasterised(role, page_count);
    }

    let start = Instant::now();
    let staged = stage::stage_pages(
        store,
        pages,
        config.url_ttl_secs,
        config.upload_concurrency,
        progress,
    )
    .await?;

    Ok(Prepared {
        pages: page_count,
        staged,
        rasterise_ms,
        stage_ms: start.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuditRequest, ContentType};
    use crate::progress::AuditProgressCallback;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const ANSWER: &str = "| Role | Rate |\n| --- | --- |\n| Engineer | 50 |\n| Tech | 40 |\n\nSummary\n- No overbilling.";

    struct CannedService {
        answer: Result<String, fn() -> AuditError>,
        seen: Mutex<Option<AuditRequest>>,
    }

    impl CannedService {
        fn ok(answer: &str) -> Self {
            Self {
                answer: Ok(answer.to_string()),
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl AuditService for CannedService {
        async fn complete(&self, request: &AuditRequest) -> Result<AuditResult, AuditError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            match &self.answer {
                Ok(text) => Ok(AuditResult::new(text.clone())),
                Err(make) => Err(make()),
            }
        }
    }

    fn png_doc(role: Role) -> SourceDocument {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(6, 6))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        SourceDocument::new(buf.into_inner(), ContentType::Image, role)
    }

    #[tokio::test]
    async fn image_inputs_end_to_end() {
        let store = MemoryStore::new();
        let service = CannedService::ok(ANSWER);
        let outcome = run_audit(
            png_doc(Role::Po),
            png_doc(Role::Invoice),
            &AuditConfig::default(),
            &store,
            &service,
        )
        .await
        .unwrap();

        assert_eq!(store.keys().await, vec!["invoice_img.png", "po_img.png"]);
        assert_eq!(outcome.staged.len(), 2);
        assert_eq!(outcome.stats.po_pages, 1);
        assert_eq!(outcome.stats.table_rows, 2);
        assert!(outcome.csv.is_some());
        assert!(outcome.report_pdf.starts_with(b"%PDF"));

        let seen = service.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.text_block_count(), 2);
        assert_eq!(seen.image_block_count(), 2);
    }

    #[tokio::test]
    async fn swapped_roles_are_rejected() {
        let store = MemoryStore::new();
        let err = run_audit(
            png_doc(Role::Invoice),
            png_doc(Role::Po),
            &AuditConfig::default(),
            &store,
            &CannedService::ok(ANSWER),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuditError::InvalidConfig(_)));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn service_failure_propagates_unchanged() {
        let service = CannedService {
            answer: Err(|| AuditError::ServiceUnavailable {
                detail: "429".into(),
            }),
            seen: Mutex::new(None),
        };
        let err = run_audit(
            png_doc(Role::Po),
            png_doc(Role::Invoice),
            &AuditConfig::default(),
            &MemoryStore::new(),
            &service,
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn storage_failure_skips_the_service() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let service = CannedService::ok(ANSWER);
        let err = run_audit(
            png_doc(Role::Po),
            png_doc(Role::Invoice),
            &AuditConfig::default(),
            &store,
            &service,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuditError::StorageUnavailable { .. }));
        assert!(service.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_events_fire() {
        #[derive(Default)]
        struct Counter {
            staged: AtomicUsize,
            complete: AtomicUsize,
        }
        impl AuditProgressCallback for Counter {
            fn on_page_staged(&self, _role: Role, _page: usize, _total: usize) {
                self.staged.fetch_add(1, Ordering::SeqCst);
            }
            fn on_audit_complete(&self, table_found: bool) {
                assert!(table_found);
                self.complete.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter::default());
        let config = AuditConfig::builder()
            .progress_callback(counter.clone())
            .build()
            .unwrap();
        run_audit(
            png_doc(Role::Po),
            png_doc(Role::Invoice),
            &config,
            &MemoryStore::new(),
            &CannedService::ok(ANSWER),
        )
        .await
        .unwrap();

        assert_eq!(counter.staged.load(Ordering::SeqCst), 2);
        assert_eq!(counter.complete.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn export_without_table() {
        let exported = export_artifacts(&AuditResult::new("Documents are unreadable.")).unwrap();
        assert!(exported.table.is_none());
        assert!(exported.csv.is_none());
        assert!(!exported.report_pdf.is_empty());
    }

    #[tokio::test]
    async fn write_artifacts_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let result = AuditResult::new(ANSWER);
        let exported = export_artifacts(&result).unwrap();

        let written = write_artifacts(&out, &result, &exported).await.unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(
            std::fs::read_to_string(out.join(CSV_FILE_NAME)).unwrap(),
            "Role,Rate\nEngineer,50\nTech,40\n"
        );
        assert_eq!(std::fs::read_to_string(out.join(RESULT_FILE_NAME)).unwrap(), ANSWER);
        assert!(!out.join(format!("{REPORT_FILE_NAME}.tmp")).exists());
    }

    #[tokio::test]
    async fn missing_input_file() {
        let err = audit_files(
            "/no/such/po.pdf",
            "/no/such/invoice.pdf",
            &AuditConfig::default(),
            &MemoryStore::new(),
            &CannedService::ok(ANSWER),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuditError::FileNotFound { .. }));
    }
}

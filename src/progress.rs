//! Progress-callback trait for stage-level audit events.
//!
//! Inject an [`Arc<dyn AuditProgressCallback>`] via
//! [`crate::config::AuditConfigBuilder::progress_callback`] to receive events
//! as the pipeline moves through rasterising, staging and the service call.
//! The service call can take tens of seconds; these events are what lets a
//! front end show something other than a frozen screen.
//!
//! # Example
//!
//! ```rust
//! use payshield::{AuditConfig, AuditProgressCallback, Role};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     staged: AtomicUsize,
//! }
//!
//! impl AuditProgressCallback for CountingCallback {
//!     fn on_page_staged(&self, role: Role, page: usize, total: usize) {
//!         self.staged.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{role} page {page}/{total} staged");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { staged: AtomicUsize::new(0) });
//!
//! let config = AuditConfig::builder()
//!     .progress_callback(counter as Arc<dyn AuditProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::model::Role;
use std::sync::Arc;

/// Called by the audit pipeline as it moves through its stages.
///
/// Both documents are processed concurrently, so `on_document_rasterised`
/// and `on_page_staged` may be called from different tasks at the same
/// time. Implementations must protect shared mutable state accordingly.
pub trait AuditProgressCallback: Send + Sync {
    /// Called once before any document is decoded.
    fn on_audit_start(&self) {}

    /// Called when a document has been turned into page images.
    ///
    /// # Arguments
    /// * `role`: which document
    /// * `pages`: number of page images produced
    fn on_document_rasterised(&self, role: Role, pages: usize) {
        let _ = (role, pages);
    }

    /// Called after each page upload completes (completion order, not page order).
    ///
    /// # Arguments
    /// * `role`: which document
    /// * `page`: 1-indexed page number
    /// * `total`: pages in this document
    fn on_page_staged(&self, role: Role, page: usize, total: usize) {
        let _ = (role, page, total);
    }

    /// Called just before the request is submitted to the reasoning service.
    ///
    /// # Arguments
    /// * `images`: total image blocks in the request
    fn on_service_call_start(&self, images: usize) {
        let _ = images;
    }

    /// Called once after artifacts have been rendered.
    ///
    /// # Arguments
    /// * `table_found`: whether a pipe table was extracted
    fn on_audit_complete(&self, table_found: bool) {
        let _ = table_found;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AuditProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AuditConfig`].
pub type ProgressCallback = Arc<dyn AuditProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        staged: AtomicUsize,
        rasterised: Mutex<Vec<(Role, usize)>>,
        table_found: Mutex<Option<bool>>,
    }

    impl AuditProgressCallback for TrackingCallback {
        fn on_document_rasterised(&self, role: Role, pages: usize) {
            self.rasterised.lock().unwrap().push((role, pages));
        }

        fn on_page_staged(&self, _role: Role, _page: usize, _total: usize) {
            self.staged.fetch_add(1, Ordering::SeqCst);
        }

        fn on_audit_complete(&self, table_found: bool) {
            *self.table_found.lock().unwrap() = Some(table_found);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_audit_start();
        cb.on_document_rasterised(Role::Po, 2);
        cb.on_page_staged(Role::Po, 1, 2);
        cb.on_service_call_start(3);
        cb.on_audit_complete(false);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_document_rasterised(Role::Po, 2);
        tracker.on_document_rasterised(Role::Invoice, 1);
        tracker.on_page_staged(Role::Po, 2, 2);
        tracker.on_page_staged(Role::Po, 1, 2);
        tracker.on_page_staged(Role::Invoice, 1, 1);
        tracker.on_audit_complete(true);

        assert_eq!(tracker.staged.load(Ordering::SeqCst), 3);
        assert_eq!(
            *tracker.rasterised.lock().unwrap(),
            vec![(Role::Po, 2), (Role::Invoice, 1)]
        );
        assert_eq!(*tracker.table_found.lock().unwrap(), Some(true));
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn AuditProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_audit_start();
        cb.on_page_staged(Role::Invoice, 1, 1);
    }
}

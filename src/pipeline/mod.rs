//! Pipeline stages for a purchase-order / invoice audit.
//!
//! Each submodule implements one transformation step and is testable on
//! its own. Data only moves forward; no stage reaches back into another.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ rasterize ──▶ encode ──▶ stage ──▶ request ──▶ service ──┬──▶ table
//! (path/URL) (pdfium)     (PNG)     (upload)  (blocks)    (model)    └──▶ report
//! ```
//!
//! 1. [`input`]     resolve a path or URL and detect PDF vs. image
//! 2. [`rasterize`] one RGB image per page; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]    PNG-encode each page for upload
//! 4. [`stage`]     upload pages and mint expiring read-only URLs
//! 5. [`request`]   instruction, labels and image URLs in page order
//! 6. [`service`]   the single chat-completions call
//! 7. [`table`]     best-effort pipe-table extraction and CSV export
//! 8. [`report`]    paginated PDF of the raw answer

pub mod encode;
pub mod input;
pub mod rasterize;
pub mod report;
pub mod request;
pub mod service;
pub mod stage;
pub mod table;

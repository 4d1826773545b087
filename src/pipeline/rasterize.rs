//! Rasterisation: turn a [`SourceDocument`] into RGB page images.
//!
//! Both paths run inside `spawn_blocking`: pdfium for PDF pages, the
//! `image` crate for standalone JPEG/PNG files. An image yields exactly one
//! page.
//!
//! Every page leaves this module as `DynamicImage::ImageRgb8`, whatever the
//! source colour mode (grayscale, RGBA, palette). Alpha is dropped.

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::model::{ContentType, PageImage, Role, SourceDocument};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// pdfium initialises and destroys global library state per binding, so
/// rendering is serialised process-wide.
static PDFIUM_LOCK: Mutex<()> = Mutex::new(());

/// Rasterise a document into ordered page images (1-based page numbers).
pub async fn rasterize(
    doc: SourceDocument,
    config: &AuditConfig,
) -> Result<Vec<PageImage>, AuditError> {
    let (bytes, content_type, role) = doc.into_parts();

    if content_type == ContentType::Pdf && !bytes.starts_with(b"%PDF") {
        return Err(AuditError::UnsupportedFormat {
            role,
            detail: "declared as PDF but the %PDF header is missing".into(),
        });
    }
    let scale = config.render_scale();
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();

    let pages = tokio::task::spawn_blocking(move || match content_type {
        ContentType::Image => decode_image(&bytes, role).map(|page| vec![page]),
        ContentType::Pdf => {
            render_pdf_blocking(&bytes, role, scale, max_pixels, password.as_deref())
        }
    })
    .await
    .map_err(|e| AuditError::Internal(format!("Render task panicked: {}", e)))??;

    info!("{} document rasterised: {} page(s)", role, pages.len());
    Ok(pages)
}

/// Decode a JPEG/PNG into a single RGB page.
fn decode_image(bytes: &[u8], role: Role) -> Result<PageImage, AuditError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| AuditError::UnsupportedFormat {
        role,
        detail: format!("image could not be decoded: {e}"),
    })?;
    debug!(
        "{} image decoded: {}x{} {:?}",
        role,
        decoded.width(),
        decoded.height(),
        decoded.color()
    );
    Ok(PageImage {
        role,
        page: 1,
        source: ContentType::Image,
        image: to_rgb(decoded),
    })
}

/// Normalise any colour mode to 8-bit RGB.
pub fn to_rgb(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

fn render_pdf_blocking(
    bytes: &[u8],
    role: Role,
    scale: f32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<PageImage>, AuditError> {
    let _guard = PDFIUM_LOCK
        .lock()
        .map_err(|_| AuditError::Internal("pdfium lock poisoned".into()))?;
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| AuditError::UnsupportedFormat {
            role,
            detail: format!("PDF could not be opened: {:?}", e),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if total == 0 {
        return Err(AuditError::EmptyDocument { role });
    }
    debug!("{} PDF loaded: {} pages", role, total);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut out = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            AuditError::RasterisationFailed {
                role,
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;
        let image = to_rgb(bitmap.as_image());
        debug!(
            "Rendered {} page {} → {}x{} px",
            role,
            idx + 1,
            image.width(),
            image.height()
        );
        out.push(PageImage {
            role,
            page: idx + 1,
            source: ContentType::Pdf,
            image,
        });
    }
    Ok(out)
}

/// Bind to a pdfium shared library.
///
/// Lookup order: `PDFIUM_LIB_PATH` (file or directory), the working
/// directory, then the system library path.
pub fn bind_pdfium() -> Result<Pdfium, AuditError> {
    if let Ok(custom) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(&custom);
        let lib = if path.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        } else {
            path
        };
        return Pdfium::bind_to_library(&lib)
            .map(Pdfium::new)
            .map_err(|e| {
                AuditError::PdfiumBindingFailed(format!("{}: {:?}", lib.display(), e))
            });
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| AuditError::PdfiumBindingFailed(format!("{:?}", e)))
}

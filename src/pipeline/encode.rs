//! Image encoding: `PageImage` → PNG bytes for upload.
//!
//! PNG is lossless; rate tables set in small print survive intact, where
//! JPEG artefacts around digits would cost the vision model accuracy.

use crate::error::AuditError;
use crate::model::PageImage;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Encode a page as PNG.
pub fn encode_png(page: &PageImage) -> Result<Vec<u8>, AuditError> {
    let mut buf = Vec::new();
    page.image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| AuditError::Internal(format!("PNG encode failed for {}: {e}", page.storage_key())))?;
    debug!("Encoded {} → {} bytes", page.storage_key(), buf.len());
    Ok(buf)
}

/// Decode PNG bytes back into an image.
pub fn decode_png(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory_with_format(bytes, ImageFormat::Png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentType, Role};
    use image::{ColorType, Rgb, RgbImage};

    #[test]
    fn png_keeps_dimensions_and_rgb() {
        let page = PageImage {
            role: Role::Po,
            page: 2,
            source: ContentType::Pdf,
            image: DynamicImage::ImageRgb8(RgbImage::from_pixel(17, 9, Rgb([0, 128, 255]))),
        };
        let bytes = encode_png(&page).unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));

        let back = decode_png(&bytes).unwrap();
        assert_eq!((back.width(), back.height()), (17, 9));
        assert_eq!(back.color(), ColorType::Rgb8);
        assert_eq!(back.to_rgb8().get_pixel(16, 8).0, [0, 128, 255]);
    }
}

//! Image encoding: `DynamicImage` → base64 PNG for the cloud OCR request.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as base64 PNG, the form the Vision
/// `image.content` field expects.
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(png_bytes = buf.len(), b64_bytes = b64.len(), "Encoded page image");
    Ok(b64)
}

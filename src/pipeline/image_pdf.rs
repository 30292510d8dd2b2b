//! Image → PDF conversion for the `/api/convert-to-pdf` endpoint.
//!
//! One A4 page per image, in upload order. Each image is centred and scaled
//! to fit inside a 15 mm margin without upscaling. The pixels are first
//! thumbnailed (aspect ratio kept) to at most 1024x1024, or to a tighter
//! caller-chosen bound, to keep the PDF small.

use crate::error::PipelineError;
use printpdf::{
    Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Pt, RawImage, RawImageData,
    RawImageFormat, XObjectTransform,
};
use tracing::{debug, info};

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 15.0;
/// Native resolution assumed when placing pixels on the page.
const IMAGE_DPI: f32 = 150.0;

/// Pixel bound applied to every image, and the default for a custom resize.
pub const DEFAULT_RESIZE: u32 = 1024;

/// One uploaded image.
#[derive(Debug, Clone)]
pub struct NamedImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Largest `(width, height)` an image keeps: `custom` when given, never
/// beyond [`DEFAULT_RESIZE`] on either axis.
pub fn pixel_bounds(custom: Option<(u32, u32)>) -> (u32, u32) {
    let (w, h) = custom.unwrap_or((DEFAULT_RESIZE, DEFAULT_RESIZE));
    (w.clamp(1, DEFAULT_RESIZE), h.clamp(1, DEFAULT_RESIZE))
}

/// Build a PDF with one page per image.
///
/// Every image is bounded by [`pixel_bounds`] of `resize`.
pub fn images_to_pdf(
    images: &[NamedImage],
    resize: Option<(u32, u32)>,
) -> Result<Vec<u8>, PipelineError> {
    if images.is_empty() {
        return Err(PipelineError::Validation("No valid images found".into()));
    }

    let (max_w, max_h) = pixel_bounds(resize);
    let mut doc = PdfDocument::new("Images");
    let mut pages = Vec::with_capacity(images.len());

    for img in images {
        let decoded = image::load_from_memory(&img.bytes).map_err(|e| {
            PipelineError::Validation(format!("Cannot decode image {}: {e}", img.name))
        })?;
        let decoded = if decoded.width() > max_w || decoded.height() > max_h {
            decoded.thumbnail(max_w, max_h)
        } else {
            decoded
        };

        let rgb = decoded.to_rgb8();
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        let raw = RawImage {
            pixels: RawImageData::U8(rgb.into_raw()),
            width,
            height,
            data_format: RawImageFormat::RGB8,
            tag: Vec::new(),
        };
        let xobject_id = doc.add_image(&raw);

        let margin_pt = Mm(MARGIN_MM).into_pt().0;
        let usable_w_pt = Mm(PAGE_WIDTH_MM - 2.0 * MARGIN_MM).into_pt().0;
        let usable_h_pt = Mm(PAGE_HEIGHT_MM - 2.0 * MARGIN_MM).into_pt().0;
        let img_w_pt = width as f32 / IMAGE_DPI * 72.0;
        let img_h_pt = height as f32 / IMAGE_DPI * 72.0;
        let scale = (usable_w_pt / img_w_pt).min(usable_h_pt / img_h_pt).min(1.0);

        let x_offset = margin_pt + (usable_w_pt - img_w_pt * scale) / 2.0;
        let y_offset = margin_pt + (usable_h_pt - img_h_pt * scale) / 2.0;
        debug!(name = %img.name, width, height, scale, "Image placed on page");

        pages.push(PdfPage::new(
            Mm(PAGE_WIDTH_MM),
            Mm(PAGE_HEIGHT_MM),
            vec![Op::UseXobject {
                id: xobject_id,
                transform: XObjectTransform {
                    translate_x: Some(Pt(x_offset)),
                    translate_y: Some(Pt(y_offset)),
                    scale_x: Some(scale),
                    scale_y: Some(scale),
                    dpi: Some(IMAGE_DPI),
                    rotate: None,
                },
            }],
        ));
    }

    doc.with_pages(pages);
    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);
    info!(images = images.len(), bytes = bytes.len(), "Image PDF created");
    Ok(bytes)
}

/// Download name for the converted PDF: the requested name with `.pdf`
/// appended when missing, else the first image's stem.
pub fn output_file_name(requested: Option<&str>, first_image: &str) -> String {
    match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) if name.to_ascii_lowercase().ends_with(".pdf") => name.to_string(),
        Some(name) => format!("{name}.pdf"),
        None => {
            let stem = std::path::Path::new(first_image)
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .unwrap_or("images");
            format!("{stem}.pdf")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([10, 200, 30])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn one_page_per_image() {
        let images = vec![
            NamedImage { name: "a.png".into(), bytes: png(40, 30) },
            NamedImage { name: "b.png".into(), bytes: png(30, 40) },
        ];
        let pdf = images_to_pdf(&images, Some((DEFAULT_RESIZE, DEFAULT_RESIZE))).unwrap();
        let doc = lopdf::Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn undecodable_image_is_validation_error() {
        let images = vec![NamedImage { name: "x.png".into(), bytes: b"nope".to_vec() }];
        let err = images_to_pdf(&images, None).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn bounds_never_exceed_default() {
        assert_eq!(pixel_bounds(None), (1024, 1024));
        assert_eq!(pixel_bounds(Some((2000, 300))), (1024, 300));
        assert_eq!(pixel_bounds(Some((0, 0))), (1, 1));
    }

    /// `(Width, Height)` of every image XObject.
    fn image_sizes(pdf: &[u8]) -> Vec<(i64, i64)> {
        let doc = lopdf::Document::load_mem(pdf).unwrap();
        doc.objects
            .values()
            .filter_map(|obj| obj.as_stream().ok())
            .filter(|s| {
                s.dict.get(b"Subtype").and_then(|t| t.as_name()).ok() == Some(b"Image".as_slice())
            })
            .map(|s| {
                let dim = |key: &[u8]| s.dict.get(key).and_then(|v| v.as_i64()).unwrap();
                (dim(b"Width"), dim(b"Height"))
            })
            .collect()
    }

    #[test]
    fn large_images_are_capped_without_resize_flag() {
        let images = vec![NamedImage { name: "wide.png".into(), bytes: png(1500, 200) }];
        let pdf = images_to_pdf(&images, None).unwrap();
        let sizes = image_sizes(&pdf);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].0, 1024);
        assert!(sizes[0].1 < 200);
    }

    #[test]
    fn custom_bound_is_tighter() {
        let images = vec![NamedImage { name: "sq.png".into(), bytes: png(400, 400) }];
        let pdf = images_to_pdf(&images, Some((100, 5000))).unwrap();
        assert_eq!(image_sizes(&pdf), vec![(100, 100)]);
    }

    #[test]
    fn output_names() {
        assert_eq!(output_file_name(Some("report"), "a.png"), "report.pdf");
        assert_eq!(output_file_name(Some("report.PDF"), "a.png"), "report.PDF");
        assert_eq!(output_file_name(None, "scan-01.jpeg"), "scan-01.pdf");
        assert_eq!(output_file_name(Some("  "), "photo.png"), "photo.pdf");
    }
}

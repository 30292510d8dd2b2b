//! Page PDF encoding: one page's OCR text → a standalone PDF artifact.
//!
//! Text is laid out top-to-bottom on A4 at 12 pt. Lines are wrapped by
//! measured width, using the embedded font's advances (Courier is a fixed
//! 0.6 em), and the layout breaks onto further PDF pages when the text runs
//! past the bottom margin, so one source page may yield a multi-page
//! artifact.
//!
//! ## Fonts
//!
//! A [`PageFont`] is either an embedded TrueType font (fetched once and
//! shared read-only by every page of a run) or the built-in Courier. Each
//! character is looked up in the embedded font's cmap first. Characters the
//! font lacks are written in Courier when they are Latin-1 and as `?`
//! otherwise; the `?` placeholders are counted in
//! [`TextPdf::missing_glyphs`]. No character is ever written as glyph 0.

use crate::error::PipelineError;
use font_fetch::{ensure_font, FetchOptions};
use printpdf::{
    BuiltinFont, FontId, Mm, Op, ParsedFont, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg,
    Point, Pt, TextItem,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 15.0;
const FONT_SIZE_PT: f32 = 12.0;
const LINE_HEIGHT_PT: f32 = 17.0;
/// Courier advance, in em.
const COURIER_WIDTH_EM: f32 = 0.6;

/// The font every page of a run is written with.
#[derive(Clone, Debug)]
pub struct PageFont {
    embedded: Option<Arc<[u8]>>,
    fallback_reason: Option<String>,
}

impl PageFont {
    /// The built-in Courier font.
    pub fn courier(reason: impl Into<String>) -> Self {
        Self {
            embedded: None,
            fallback_reason: Some(reason.into()),
        }
    }

    /// Use `bytes` if they parse as a font, else fall back to Courier.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mut warnings = Vec::new();
        if ParsedFont::from_bytes(&bytes, 0, &mut warnings).is_some() {
            Self {
                embedded: Some(bytes.into()),
                fallback_reason: None,
            }
        } else {
            Self::courier("font file could not be parsed")
        }
    }

    /// Load the font at `path`, falling back to Courier when it is missing
    /// or unreadable.
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_bytes(bytes),
            Err(e) => Self::courier(format!("cannot read {}: {e}", path.display())),
        }
    }

    /// Make sure the font from `url` is cached at `path`, then load it.
    ///
    /// Never fails: a download or parse failure yields Courier, with the
    /// reason available from [`PageFont::fallback_reason`].
    pub async fn acquire(url: &str, path: &Path, retries: u32) -> Self {
        let url = url.to_string();
        let dest = path.to_path_buf();
        let options = FetchOptions {
            retries,
            ..FetchOptions::default()
        };

        let fetched = tokio::task::spawn_blocking(move || ensure_font(&url, &dest, &options))
            .await
            .map_err(|e| format!("font task panicked: {e}"))
            .and_then(|r| r.map_err(|e| e.to_string()));

        match fetched {
            Ok(p) => {
                let font = Self::from_file(&p);
                if let Some(reason) = font.fallback_reason() {
                    warn!(path = %p.display(), "Font unusable, using Courier: {reason}");
                } else {
                    info!(path = %p.display(), "Using embedded font");
                }
                font
            }
            Err(reason) => {
                warn!("Font fetch failed, using Courier: {reason}");
                Self::courier(reason)
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.embedded.is_none()
    }

    /// Why the font fell back to Courier, if it did.
    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }
}

/// A laid-out text PDF.
#[derive(Debug, Clone)]
pub struct TextPdf {
    pub bytes: Vec<u8>,
    /// Characters written as `?` because neither font had a glyph for them.
    pub missing_glyphs: usize,
}

/// What [`write_page_pdf`] put on disk.
#[derive(Debug, Clone)]
pub struct WrittenPage {
    pub path: PathBuf,
    pub missing_glyphs: usize,
}

/// Cmap and advance widths of the embedded font.
struct FontMetrics {
    font: ParsedFont,
    units_per_em: f32,
}

impl FontMetrics {
    fn parse(bytes: &[u8]) -> Option<Self> {
        let mut warnings = Vec::new();
        let font = ParsedFont::from_bytes(bytes, 0, &mut warnings)?;
        let units_per_em = match font.font_metrics.units_per_em {
            0 => 1000.0,
            upem => f32::from(upem),
        };
        Some(Self { font, units_per_em })
    }

    /// Glyph for `c`; glyph 0 is `.notdef` and counts as absent.
    fn glyph(&self, c: char) -> Option<u16> {
        self.font.lookup_glyph_index(c as u32).filter(|&g| g != 0)
    }

    /// Advance of `glyph` in em, read from `hmtx`.
    fn advance_em(&self, glyph: u16) -> f32 {
        let long_metrics = self
            .font
            .hhea_table
            .as_ref()
            .map(|h| usize::from(h.num_h_metrics))
            .unwrap_or(0);
        let units = if long_metrics == 0 {
            self.font.get_horizontal_advance(glyph)
        } else {
            // Glyphs past the long metrics share the last advance.
            let idx = usize::from(glyph).min(long_metrics - 1) * 4;
            self.font
                .hmtx_data
                .get(idx..idx + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .unwrap_or_else(|| self.font.get_horizontal_advance(glyph))
        };
        f32::from(units) / self.units_per_em
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Embedded,
    Courier,
}

/// How one character is drawn.
#[derive(Debug, Clone, Copy)]
struct Placed {
    face: Face,
    ch: char,
    width_em: f32,
    missing: bool,
}

/// Pick the face for `c`. `None` drops the character: zero-width format
/// characters that no font covers.
fn place(metrics: Option<&FontMetrics>, c: char) -> Option<Placed> {
    let c = if c.is_control() { ' ' } else { c };
    if let Some(m) = metrics {
        if let Some(glyph) = m.glyph(c) {
            return Some(Placed {
                face: Face::Embedded,
                ch: c,
                width_em: m.advance_em(glyph),
                missing: false,
            });
        }
    }
    if matches!(c, '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}') {
        return None;
    }
    let latin1 = (c as u32) <= 0xFF;
    Some(Placed {
        face: Face::Courier,
        ch: if latin1 { c } else { '?' },
        width_em: COURIER_WIDTH_EM,
        missing: !latin1,
    })
}

/// Ops that write `text` in `face` at the body size.
fn run_ops(face: Face, text: String, embedded: Option<&FontId>) -> [Op; 2] {
    let items = vec![TextItem::Text(text)];
    match (face, embedded) {
        (Face::Embedded, Some(id)) => [
            Op::SetFontSize {
                size: Pt(FONT_SIZE_PT),
                font: id.clone(),
            },
            Op::WriteText {
                items,
                font: id.clone(),
            },
        ],
        _ => [
            Op::SetFontSizeBuiltinFont {
                size: Pt(FONT_SIZE_PT),
                font: BuiltinFont::Courier,
            },
            Op::WriteTextBuiltinFont {
                items,
                font: BuiltinFont::Courier,
            },
        ],
    }
}

/// Turn one laid-out line into text ops, switching font at each face
/// change. Returns the ops and the number of placeholders written.
fn line_ops(
    line: &str,
    metrics: Option<&FontMetrics>,
    embedded: Option<&FontId>,
) -> (Vec<Op>, usize) {
    let mut ops = Vec::new();
    let mut missing = 0;
    let mut run = String::new();
    let mut run_face = Face::Courier;

    for placed in line.chars().filter_map(|c| place(metrics, c)) {
        missing += usize::from(placed.missing);
        if placed.face != run_face && !run.is_empty() {
            ops.extend(run_ops(run_face, std::mem::take(&mut run), embedded));
        }
        run_face = placed.face;
        run.push(placed.ch);
    }
    if !run.is_empty() {
        ops.extend(run_ops(run_face, run, embedded));
    }

    (ops, missing)
}

/// Lay out `text` and serialise it as PDF bytes.
pub fn render_text_pdf(title: &str, text: &str, font: &PageFont) -> TextPdf {
    let mut doc = PdfDocument::new(title);

    let metrics = font.embedded.as_deref().and_then(FontMetrics::parse);
    let embedded_id = metrics.as_ref().map(|m| doc.add_font(&m.font));

    let margin_pt = Mm(MARGIN_MM).into_pt().0;
    let page_w_pt = Mm(PAGE_WIDTH_MM).into_pt().0;
    let page_h_pt = Mm(PAGE_HEIGHT_MM).into_pt().0;
    let usable_width_pt = page_w_pt - 2.0 * margin_pt;
    let lines_per_page = ((page_h_pt - 2.0 * margin_pt) / LINE_HEIGHT_PT) as usize;

    let char_width_pt =
        |c: char| place(metrics.as_ref(), c).map_or(0.0, |p| p.width_em * FONT_SIZE_PT);
    let lines = wrap_text(text, usable_width_pt, char_width_pt);

    let mut missing_glyphs = 0;
    let mut pages: Vec<PdfPage> = lines
        .chunks(lines_per_page.max(1))
        .map(|chunk| {
            let mut ops = Vec::with_capacity(chunk.len() * 5);
            for (idx, line) in chunk.iter().enumerate() {
                let y_pt = page_h_pt - margin_pt - FONT_SIZE_PT - idx as f32 * LINE_HEIGHT_PT;
                let (text_ops, missing) = line_ops(line, metrics.as_ref(), embedded_id.as_ref());
                missing_glyphs += missing;
                if text_ops.is_empty() {
                    continue;
                }
                ops.push(Op::StartTextSection);
                ops.push(Op::SetTextCursor {
                    pos: Point {
                        x: Pt(margin_pt),
                        y: Pt(y_pt),
                    },
                });
                ops.extend(text_ops);
                ops.push(Op::EndTextSection);
            }
            PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), ops)
        })
        .collect();

    if pages.is_empty() {
        pages.push(PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), Vec::new()));
    }
    doc.with_pages(pages);

    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    TextPdf {
        bytes: doc.save(&PdfSaveOptions::default(), &mut warnings),
        missing_glyphs,
    }
}

/// Write page `page`'s text to `out_path` as a PDF artifact.
///
/// Layout and serialisation run on the blocking pool.
pub async fn write_page_pdf(
    page: usize,
    text: String,
    font: &PageFont,
    out_path: &Path,
) -> Result<WrittenPage, PipelineError> {
    let font = font.clone();
    let path = out_path.to_path_buf();
    let encoding_err = |path: &Path, detail: String| PipelineError::Encoding {
        page,
        path: path.to_path_buf(),
        detail,
    };

    let pdf = tokio::task::spawn_blocking(move || {
        render_text_pdf(&format!("Page {page}"), &text, &font)
    })
    .await
    .map_err(|e| encoding_err(out_path, format!("encoder task panicked: {e}")))?;

    tokio::fs::write(&path, &pdf.bytes)
        .await
        .map_err(|e| encoding_err(&path, e.to_string()))?;

    debug!(
        page,
        bytes = pdf.bytes.len(),
        missing_glyphs = pdf.missing_glyphs,
        path = %path.display(),
        "Page PDF written"
    );
    Ok(WrittenPage {
        path,
        missing_glyphs: pdf.missing_glyphs,
    })
}

// -- Text helpers -------------------------------------------------------------

/// Wrap text so that no line is wider than `max_width`, measuring each
/// character with `char_width`.
///
/// Splits on existing newlines first, then word-wraps each paragraph. Words
/// wider than a line are broken at character boundaries; a line always
/// takes at least one character.
pub fn wrap_text(text: &str, max_width: f32, char_width: impl Fn(char) -> f32) -> Vec<String> {
    let width_of = |s: &str| s.chars().map(&char_width).sum::<f32>();
    let space = char_width(' ');
    let mut result = Vec::new();

    for paragraph in text.split('\n') {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            result.push(String::new());
            continue;
        }

        let mut current = String::new();
        let mut current_width = 0.0f32;

        for word in words {
            let word_width = width_of(word);
            if word_width > max_width {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                current_width = 0.0;
                for c in word.chars() {
                    let w = char_width(c);
                    if !current.is_empty() && current_width + w > max_width {
                        result.push(std::mem::take(&mut current));
                        current_width = 0.0;
                    }
                    current.push(c);
                    current_width += w;
                }
            } else if current.is_empty() {
                current.push_str(word);
                current_width = word_width;
            } else if current_width + space + word_width <= max_width {
                current.push(' ');
                current.push_str(word);
                current_width += space + word_width;
            } else {
                result.push(std::mem::replace(&mut current, word.to_string()));
                current_width = word_width;
            }
        }

        if !current.is_empty() {
            result.push(current);
        }
    }

    result
}

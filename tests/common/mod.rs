//! Scripted pipeline stages shared by the integration tests.
//!
//! None of these touch pdfium, the OCR models or the network, so the tests
//! using them run anywhere.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use lopdf::content::Content;
use lopdf::{Document, Object};
use pdfocr_stream::pipeline::ocr::{Extractors, TextExtractor};
use pdfocr_stream::pipeline::page_pdf::PageFont;
use pdfocr_stream::pipeline::render::{PageStream, Rasterizer};
use pdfocr_stream::{
    Language, OcrBackend, PipelineConfig, PipelineError, Pipeline, ProgressEvent, ProgressSink,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A small Latin-only TrueType font.
pub const FIXTURE_FONT: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/Montserrat-Regular.ttf");

// ── Rasterizer ───────────────────────────────────────────────────────────────

/// Hands out `pages` blank images regardless of the source file.
pub struct BlankPages {
    pub pages: usize,
}

#[async_trait]
impl Rasterizer for BlankPages {
    async fn rasterize(&self, _pdf_path: &Path, _dpi: u32) -> Result<PageStream, PipelineError> {
        let images = (0..self.pages)
            .map(|_| DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
            .collect();
        Ok(PageStream::from_images(images))
    }
}

/// Fails like an unreadable document.
pub struct BrokenDocument;

#[async_trait]
impl Rasterizer for BrokenDocument {
    async fn rasterize(&self, pdf_path: &Path, _dpi: u32) -> Result<PageStream, PipelineError> {
        Err(PipelineError::Rasterization {
            path: pdf_path.to_path_buf(),
            detail: "unreadable".into(),
        })
    }
}

// ── OCR ──────────────────────────────────────────────────────────────────────

type Script = dyn Fn(usize) -> Result<String, PipelineError> + Send + Sync;

/// Text extractor answering from a script keyed by page number.
pub struct ScriptedOcr {
    script: Box<Script>,
    pub calls: AtomicUsize,
}

impl ScriptedOcr {
    pub fn new(
        script: impl Fn(usize) -> Result<String, PipelineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// "Text of page N" for every page.
    pub fn echo() -> Self {
        Self::new(|page| Ok(format!("Text of page {page}")))
    }

    /// Like [`ScriptedOcr::echo`] but `failing` returns a service error.
    pub fn failing_on(failing: usize) -> Self {
        Self::new(move |page| {
            if page == failing {
                Err(PipelineError::OcrService {
                    page,
                    status: 500,
                    message: "backend exploded".into(),
                })
            } else {
                Ok(format!("Text of page {page}"))
            }
        })
    }
}

#[async_trait]
impl TextExtractor for ScriptedOcr {
    fn backend(&self) -> OcrBackend {
        OcrBackend::Local
    }

    async fn extract(
        &self,
        page: usize,
        _image: &DynamicImage,
        _language: Language,
    ) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(page)
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub fn pipeline_with(
    config: PipelineConfig,
    rasterizer: impl Rasterizer + 'static,
    ocr: Arc<ScriptedOcr>,
) -> Pipeline {
    Pipeline::with_components(config, Arc::new(rasterizer), Extractors::single(ocr))
        .with_font(PageFont::courier("test run"))
}

/// `pages` blank pages, echo OCR, Courier, default config.
pub fn echo_pipeline(pages: usize) -> Pipeline {
    pipeline_with(
        PipelineConfig::default(),
        BlankPages { pages },
        Arc::new(ScriptedOcr::echo()),
    )
}

/// Writes a minimal file starting with the PDF magic bytes.
pub fn fake_source(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("scan.pdf");
    std::fs::write(&path, b"%PDF-1.4\n% scripted\n").expect("write source");
    path
}

// ── Progress ─────────────────────────────────────────────────────────────────

/// Collects every event in order.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|e| e.to_string()).collect()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for Recorder {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ── PDF inspection ───────────────────────────────────────────────────────────

/// Text shown on each page, one string per page in page order.
pub fn page_texts(doc: &Document) -> Vec<String> {
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let content = doc.get_page_content(page_id).expect("page content");
            let content = Content::decode(&content).expect("decode content");
            let mut lines = Vec::new();
            for op in content.operations {
                match op.operator.as_str() {
                    "Tj" | "'" | "\"" => {
                        if let Some(Object::String(bytes, _)) = op.operands.last() {
                            lines.push(latin1(bytes));
                        }
                    }
                    "TJ" => {
                        if let Some(Object::Array(items)) = op.operands.first() {
                            let line: String = items
                                .iter()
                                .filter_map(|item| match item {
                                    Object::String(bytes, _) => Some(latin1(bytes)),
                                    _ => None,
                                })
                                .collect();
                            lines.push(line);
                        }
                    }
                    _ => {}
                }
            }
            lines.join("\n")
        })
        .collect()
}

/// Glyph ids drawn with embedded (Type0) fonts, one list per page.
pub fn embedded_glyph_ids(path: &Path) -> Vec<Vec<u16>> {
    let doc = Document::load(path).expect("load pdf");
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let embedded: Vec<Vec<u8>> = doc
                .get_page_fonts(page_id)
                .expect("page fonts")
                .into_iter()
                .filter(|(_, font)| {
                    font.get(b"Subtype").and_then(|s| s.as_name()).ok() == Some(b"Type0".as_slice())
                })
                .map(|(name, _)| name)
                .collect();

            let content = Content::decode(&doc.get_page_content(page_id).expect("page content"))
                .expect("decode content");
            let mut current = Vec::new();
            let mut ids = Vec::new();
            for op in content.operations {
                match op.operator.as_str() {
                    "Tf" => {
                        current = op
                            .operands
                            .first()
                            .and_then(|o| o.as_name().ok())
                            .map(<[u8]>::to_vec)
                            .unwrap_or_default();
                    }
                    "Tj" | "TJ" if embedded.contains(&current) => {
                        let mut stack = op.operands.clone();
                        while let Some(obj) = stack.pop() {
                            match obj {
                                Object::String(bytes, _) => {
                                    ids.extend(bytes.chunks(2).map(|p| {
                                        u16::from_be_bytes([p[0], *p.get(1).unwrap_or(&0)])
                                    }))
                                }
                                Object::Array(items) => stack.extend(items),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            ids
        })
        .collect()
}

/// True when some font descriptor carries an embedded TrueType program.
pub fn has_embedded_font_program(path: &Path) -> bool {
    let doc = Document::load(path).expect("load pdf");
    doc.objects
        .values()
        .any(|obj| obj.as_dict().map(|d| d.has(b"FontFile2")).unwrap_or(false))
}

pub fn pdf_page_texts(path: &Path) -> Vec<String> {
    page_texts(&Document::load(path).expect("load pdf"))
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Files left in `dir` whose name starts with `page_`.
pub fn leftover_page_files(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("page_"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

//! Result types of a processing run.

use crate::config::{Language, OcrBackend};
use serde::Serialize;
use std::path::PathBuf;

/// Per-page record kept by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Characters of extracted text (after cleanup).
    pub chars: usize,
    /// Characters written as `?` because the page font had no glyph.
    pub missing_glyphs: usize,
    /// Set when the page failed and the skip-page policy kept the run alive.
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    /// The committed combined PDF.
    pub combined_path: PathBuf,
    /// Number of pages in the source (and in the combined PDF).
    pub page_count: usize,
    pub language: Language,
    pub backend: OcrBackend,
    /// True when pages were written with the Courier fallback font.
    pub used_fallback_font: bool,
    pub pages: Vec<PageSummary>,
    pub total_duration_ms: u64,
}

impl ProcessOutcome {
    /// Pages whose OCR or encoding failed under the skip-page policy.
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageSummary> {
        self.pages.iter().filter(|p| p.error.is_some())
    }
}

//! Page text extraction, polymorphic over OCR backends.
//!
//! [`TextExtractor`] is the seam: the orchestrator only ever holds
//! `Arc<dyn TextExtractor>`, picked once per run from [`Extractors`] by the
//! session language. Tests plug in scripted extractors through the same
//! trait.

pub mod cloud;
pub mod local;

use crate::config::{Language, OcrBackend};
use crate::error::PipelineError;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;

pub use cloud::CloudOcr;
pub use local::LocalOcr;

/// Extracts text from one rendered page.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Which backend this is; reported in the run summary.
    fn backend(&self) -> OcrBackend;

    /// Recognise the text on `image`, the 1-indexed page `page`.
    ///
    /// Returns an empty string when the page holds no text. Failures carry
    /// the page number so the orchestrator can report them.
    async fn extract(
        &self,
        page: usize,
        image: &DynamicImage,
        language: Language,
    ) -> Result<String, PipelineError>;
}

/// The two backends a pipeline can dispatch to.
#[derive(Clone)]
pub struct Extractors {
    pub local: Arc<dyn TextExtractor>,
    pub cloud: Arc<dyn TextExtractor>,
}

impl Extractors {
    pub fn new(local: Arc<dyn TextExtractor>, cloud: Arc<dyn TextExtractor>) -> Self {
        Self { local, cloud }
    }

    /// Use one extractor for every language.
    pub fn single(extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            local: Arc::clone(&extractor),
            cloud: extractor,
        }
    }

    /// The extractor a run in `language` uses.
    pub fn for_language(&self, language: Language) -> Arc<dyn TextExtractor> {
        match language.backend() {
            OcrBackend::Local => Arc::clone(&self.local),
            OcrBackend::Cloud => Arc::clone(&self.cloud),
        }
    }
}

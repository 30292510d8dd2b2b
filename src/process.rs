//! Pipeline orchestration: one source document → one combined text PDF.
//!
//! A run walks `Started → Rasterizing → PerPage(1..=N) → Merging → Done`,
//! ending in `Failed` or `Cancelled` instead when something stops it. Every
//! step is reported to a [`ProgressSink`] as it happens; the terminal event
//! (`DONE`, `Error: …` or the cancellation notice) is always the last one.
//!
//! Interim page PDFs are tracked by an [`InterimArtifacts`] guard that
//! deletes them when it goes out of scope, so they are removed on success,
//! on failure, on cancellation and if the run's future is dropped.

use crate::config::{Language, PageFailurePolicy, PipelineConfig};
use crate::error::PipelineError;
use crate::output::{PageSummary, ProcessOutcome};
use crate::pipeline::merge::merge_files_async;
use crate::pipeline::ocr::{CloudOcr, Extractors, LocalOcr, TextExtractor};
use crate::pipeline::page_pdf::{write_page_pdf, PageFont};
use crate::pipeline::postprocess::clean_ocr_text;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::progress::{resident_memory_mb, MemoryStage, ProgressEvent, ProgressSink};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name of the combined output inside a run's work directory.
pub const COMBINED_FILE_NAME: &str = "combined_text.pdf";

/// Cooperative cancellation signal shared between a run and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to process and where to put the results.
#[derive(Debug, Clone)]
pub struct ProcessJob {
    /// The source PDF.
    pub source: PathBuf,
    pub language: Language,
    /// Directory receiving the interim page PDFs.
    pub work_dir: PathBuf,
    /// Where the combined PDF is committed.
    pub output_path: PathBuf,
}

impl ProcessJob {
    /// Interim files and the combined output both live in `work_dir`.
    pub fn in_dir(
        source: impl Into<PathBuf>,
        language: Language,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let work_dir = work_dir.into();
        Self {
            source: source.into(),
            language,
            output_path: work_dir.join(COMBINED_FILE_NAME),
            work_dir,
        }
    }
}

/// Owns the interim page PDFs of one run and deletes them on drop.
#[derive(Debug, Default)]
pub struct InterimArtifacts {
    paths: Vec<PathBuf>,
}

impl InterimArtifacts {
    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Delete every tracked file now.
    pub fn remove_all(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Interim PDF removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Failed to remove interim PDF: {e}"),
            }
        }
    }
}

impl Drop for InterimArtifacts {
    fn drop(&mut self) {
        self.remove_all();
    }
}

/// The page-wise OCR pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    rasterizer: Arc<dyn Rasterizer>,
    extractors: Extractors,
    font_dir: PathBuf,
    font_override: Option<PageFont>,
}

impl Pipeline {
    /// Pipeline with pdfium rendering, local ocrs and cloud Vision OCR.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let local: Arc<dyn TextExtractor> = Arc::new(LocalOcr::new(config.ocr_model_dir.clone()));
        let cloud: Arc<dyn TextExtractor> = Arc::new(CloudOcr::from_config(&config)?);
        Ok(Self::with_components(
            config,
            Arc::new(PdfiumRasterizer::default()),
            Extractors::new(local, cloud),
        ))
    }

    /// Pipeline with caller-supplied stages.
    pub fn with_components(
        config: PipelineConfig,
        rasterizer: Arc<dyn Rasterizer>,
        extractors: Extractors,
    ) -> Self {
        Self {
            config,
            rasterizer,
            extractors,
            font_dir: font_fetch::default_cache_dir(),
            font_override: None,
        }
    }

    /// Cache fetched fonts in `dir` instead of the user cache directory.
    /// Explicit font paths in the config still win.
    pub fn with_font_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.font_dir = dir.into();
        self
    }

    /// Use `font` for every run instead of fetching one.
    pub fn with_font(mut self, font: PageFont) -> Self {
        self.font_override = Some(font);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process `job`, reporting every step to `sink`.
    ///
    /// The terminal event is emitted here, after all other events; the
    /// returned value carries the same outcome for programmatic callers.
    pub async fn run(
        &self,
        job: &ProcessJob,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<ProcessOutcome, PipelineError> {
        let mut artifacts = InterimArtifacts::default();
        let result = self.run_inner(job, sink, cancel, &mut artifacts).await;
        artifacts.remove_all();

        match &result {
            Ok(outcome) => {
                info!(
                    pages = outcome.page_count,
                    failed = outcome.failed_pages().count(),
                    ms = outcome.total_duration_ms,
                    "Processing complete"
                );
                emit(sink, ProgressEvent::Done);
            }
            Err(PipelineError::Cancelled) => {
                info!(source = %job.source.display(), "Processing cancelled");
                emit(sink, ProgressEvent::Cancelled);
            }
            Err(e) => {
                warn!(source = %job.source.display(), kind = ?e.kind(), "Processing failed: {e}");
                emit(
                    sink,
                    ProgressEvent::Failed {
                        message: e.to_string(),
                    },
                );
            }
        }
        result
    }

    async fn run_inner(
        &self,
        job: &ProcessJob,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
        artifacts: &mut InterimArtifacts,
    ) -> Result<ProcessOutcome, PipelineError> {
        let total_start = Instant::now();
        info!(source = %job.source.display(), language = %job.language, "Starting processing");

        // ── Step 1: Start ────────────────────────────────────────────────────
        emit(sink, ProgressEvent::Started);
        emit_memory(sink, MemoryStage::Initial);

        tokio::fs::create_dir_all(&job.work_dir).await.map_err(|e| {
            PipelineError::Internal(format!(
                "cannot create work directory '{}': {e}",
                job.work_dir.display()
            ))
        })?;

        // ── Step 2: Rasterise ────────────────────────────────────────────────
        let mut pages = self.rasterizer.rasterize(&job.source, self.config.dpi).await?;
        let total_pages = pages.total_pages();
        if total_pages == 0 {
            return Err(PipelineError::Rasterization {
                path: job.source.clone(),
                detail: "document has no pages".into(),
            });
        }
        emit(sink, ProgressEvent::PageCount { pages: total_pages });

        // ── Step 3: Font ─────────────────────────────────────────────────────
        let font = match &self.font_override {
            Some(font) => font.clone(),
            None => {
                let script = job.language.script();
                PageFont::acquire(
                    self.config.font_url(script),
                    &self.config.resolved_font_path(&self.font_dir, script),
                    self.config.font_fetch_retries,
                )
                .await
            }
        };
        if let Some(reason) = font.fallback_reason() {
            emit(
                sink,
                ProgressEvent::FontFallback {
                    reason: reason.to_string(),
                },
            );
        }

        // ── Step 4: Per-page OCR + encode ────────────────────────────────────
        let extractor = self.extractors.for_language(job.language);
        let mut summaries = Vec::with_capacity(total_pages);

        for expected in 1..=total_pages {
            check_cancelled(sink, cancel)?;

            let page = match pages.next_page().await {
                Some(page) => page?,
                None => {
                    return Err(PipelineError::Rasterization {
                        path: job.source.clone(),
                        detail: format!(
                            "page stream ended after {} of {total_pages} pages",
                            expected - 1
                        ),
                    })
                }
            };
            let page_num = page.page_num;
            let page_start = Instant::now();
            emit(sink, ProgressEvent::PageStarted { page: page_num });

            let mut page_error = None;
            let raw = match extractor.extract(page_num, &page.image, job.language).await {
                Ok(text) => text,
                Err(e) => {
                    page_error = Some(self.absorb_page_error(sink, page_num, e)?);
                    String::new()
                }
            };
            drop(page);

            let text = clean_ocr_text(&raw);
            let chars = text.chars().count();
            emit(sink, ProgressEvent::PageExtracted { page: page_num, chars });

            check_cancelled(sink, cancel)?;

            let page_path = job.work_dir.join(format!("page_{page_num}.pdf"));
            artifacts.track(page_path.clone());
            let label = format!("Page {page_num}");
            let page_text = format!("{label}\n{text}");
            let written = match write_page_pdf(page_num, page_text, &font, &page_path).await {
                Ok(written) => written,
                Err(e) => {
                    page_error = Some(self.absorb_page_error(sink, page_num, e)?);
                    write_page_pdf(page_num, label, &font, &page_path).await?
                }
            };
            if written.missing_glyphs > 0 {
                warn!(page = page_num, count = written.missing_glyphs, "Characters without glyphs");
                emit(
                    sink,
                    ProgressEvent::GlyphsMissing {
                        page: page_num,
                        count: written.missing_glyphs,
                    },
                );
            }
            emit(sink, ProgressEvent::PageSaved { page: page_num });
            emit_memory(sink, MemoryStage::Current);

            summaries.push(PageSummary {
                page_num,
                chars,
                missing_glyphs: written.missing_glyphs,
                error: page_error,
                duration_ms: page_start.elapsed().as_millis() as u64,
            });
        }

        // ── Step 5: Merge ────────────────────────────────────────────────────
        check_cancelled(sink, cancel)?;
        emit(sink, ProgressEvent::Merging);
        merge_files_async(artifacts.paths().to_vec(), job.output_path.clone()).await?;
        artifacts.remove_all();

        emit(
            sink,
            ProgressEvent::CombinedSaved {
                path: job.output_path.clone(),
            },
        );
        emit_memory(sink, MemoryStage::Final);

        Ok(ProcessOutcome {
            combined_path: job.output_path.clone(),
            page_count: total_pages,
            language: job.language,
            backend: extractor.backend(),
            used_fallback_font: font.is_fallback(),
            pages: summaries,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        })
    }

    /// Apply the page-failure policy: under `SkipPage` a page-level error
    /// is reported and turned into the page's recorded error message,
    /// anything else ends the run.
    fn absorb_page_error(
        &self,
        sink: &dyn ProgressSink,
        page: usize,
        error: PipelineError,
    ) -> Result<String, PipelineError> {
        if self.config.page_failure_policy == PageFailurePolicy::SkipPage && error.is_page_level() {
            warn!(page, "Skipping failed page: {error}");
            let message = error.to_string();
            emit(
                sink,
                ProgressEvent::PageFailed {
                    page,
                    error: message.clone(),
                },
            );
            Ok(message)
        } else {
            Err(error)
        }
    }
}

fn emit(sink: &dyn ProgressSink, event: ProgressEvent) {
    debug!(event = %event, "progress");
    sink.emit(event);
}

fn emit_memory(sink: &dyn ProgressSink, stage: MemoryStage) {
    emit(
        sink,
        ProgressEvent::Memory {
            stage,
            mb: resident_memory_mb(),
        },
    );
}

fn check_cancelled(sink: &dyn ProgressSink, cancel: &CancelFlag) -> Result<(), PipelineError> {
    if cancel.is_cancelled() || sink.is_closed() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Convenience wrapper: run `pipeline` on `source`, writing into `work_dir`.
pub async fn process_document(
    pipeline: &Pipeline,
    source: &Path,
    language: Language,
    work_dir: &Path,
    sink: &dyn ProgressSink,
) -> Result<ProcessOutcome, PipelineError> {
    let job = ProcessJob::in_dir(source, language, work_dir);
    pipeline.run(&job, sink, &CancelFlag::new()).await
}

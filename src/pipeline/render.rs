//! PDF rasterisation: render one page at a time to `DynamicImage` via pdfium.
//!
//! pdfium is not async-safe, so the whole document lives on one
//! `spawn_blocking` thread. Rendered pages travel to the caller through a
//! channel of capacity one: the renderer is at most one page ahead of the
//! consumer, and it stops as soon as the [`PageStream`] is dropped.

use crate::error::PipelineError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Env var pointing at a directory that contains the pdfium shared library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// A rendered page ready for OCR.
#[derive(Debug)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page_num: usize,
    pub image: DynamicImage,
}

/// Lazily produced sequence of rendered pages.
pub struct PageStream {
    total_pages: usize,
    rx: mpsc::Receiver<Result<PageImage, PipelineError>>,
}

impl PageStream {
    pub fn new(total_pages: usize, rx: mpsc::Receiver<Result<PageImage, PipelineError>>) -> Self {
        Self { total_pages, rx }
    }

    /// Build a stream from images that are already in memory.
    pub fn from_images(images: Vec<DynamicImage>) -> Self {
        let total = images.len();
        let (tx, rx) = mpsc::channel(total.max(1));
        for (idx, image) in images.into_iter().enumerate() {
            // Capacity covers every image, so this never fails.
            let _ = tx.try_send(Ok(PageImage { page_num: idx + 1, image }));
        }
        Self::new(total, rx)
    }

    /// Page count of the source document.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// The next page in order, or `None` once every page was delivered.
    pub async fn next_page(&mut self) -> Option<Result<PageImage, PipelineError>> {
        self.rx.recv().await
    }
}

/// Turns a source document into a stream of page images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Open `pdf_path` and start rendering at `dpi`.
    ///
    /// Fails with [`PipelineError::Rasterization`] when the document cannot
    /// be opened or has no pages.
    async fn rasterize(&self, pdf_path: &Path, dpi: u32) -> Result<PageStream, PipelineError>;
}

/// [`Rasterizer`] backed by the pdfium library.
#[derive(Debug, Default, Clone)]
pub struct PdfiumRasterizer {
    /// Directory holding the pdfium shared library. `None` checks
    /// `PDFIUM_LIB_PATH`, the working directory, then the system paths.
    pub library_dir: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn with_library_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: Some(dir.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, String> {
        let dir = self
            .library_dir
            .clone()
            .or_else(|| std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./"));

        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
            .or_else(|local_err| {
                debug!(dir = %dir.display(), "pdfium not found locally: {:?}", local_err);
                Pdfium::bind_to_system_library()
            })
            .map_err(|e| format!("pdfium library unavailable: {:?}", e))?;

        Ok(Pdfium::new(bindings))
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf_path: &Path, dpi: u32) -> Result<PageStream, PipelineError> {
        let path = pdf_path.to_path_buf();
        let this = self.clone();
        let (page_tx, page_rx) = mpsc::channel(1);
        let (count_tx, count_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            render_blocking(&this, &path, dpi, count_tx, page_tx);
        });

        let total = count_rx.await.map_err(|_| PipelineError::Rasterization {
            path: pdf_path.to_path_buf(),
            detail: "render thread exited before opening the document".into(),
        })??;

        Ok(PageStream::new(total, page_rx))
    }
}

/// Blocking body of [`PdfiumRasterizer::rasterize`].
fn render_blocking(
    rasterizer: &PdfiumRasterizer,
    pdf_path: &Path,
    dpi: u32,
    count_tx: oneshot::Sender<Result<usize, PipelineError>>,
    page_tx: mpsc::Sender<Result<PageImage, PipelineError>>,
) {
    let rasterization = |detail: String| PipelineError::Rasterization {
        path: pdf_path.to_path_buf(),
        detail,
    };

    let pdfium = match rasterizer.bind() {
        Ok(p) => p,
        Err(detail) => {
            let _ = count_tx.send(Err(rasterization(detail)));
            return;
        }
    };

    let document = match pdfium.load_pdf_from_file(pdf_path, None) {
        Ok(d) => d,
        Err(e) => {
            let _ = count_tx.send(Err(rasterization(format!("{:?}", e))));
            return;
        }
    };

    let pages = document.pages();
    let total = pages.len() as usize;
    if total == 0 {
        let _ = count_tx.send(Err(rasterization("document has no pages".into())));
        return;
    }
    info!(pages = total, dpi, "PDF loaded");
    if count_tx.send(Ok(total)).is_err() {
        return;
    }

    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    for idx in 0..total {
        let page_num = idx + 1;
        let rendered = render_page(&pages, idx, &render_config)
            .map_err(|e| rasterization(format!("page {page_num}: {:?}", e)));

        if let Ok(image) = &rendered {
            debug!(
                page = page_num,
                width = image.width(),
                height = image.height(),
                "Rendered page"
            );
        }
        let failed = rendered.is_err();

        if page_tx
            .blocking_send(rendered.map(|image| PageImage { page_num, image }))
            .is_err()
        {
            debug!(page = page_num, "Page consumer gone, stopping render");
            return;
        }
        if failed {
            warn!(page = page_num, "Stopping render after page failure");
            return;
        }
    }
}

fn render_page(
    pages: &PdfPages,
    idx: usize,
    config: &PdfRenderConfig,
) -> Result<DynamicImage, PdfiumError> {
    let page = pages.get(idx as u16)?;
    let bitmap = page.render_with_config(config)?;
    Ok(bitmap.as_image())
}

//! # pdfocr-stream
//!
//! Turn a scanned PDF into a text PDF, one page at a time, while streaming
//! progress to the caller.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Render    rasterise pages via pdfium (spawn_blocking, one page in flight)
//!  ├─ 2. OCR       English → local ocrs engine, Hindi / Sanskrit → cloud Vision
//!  ├─ 3. Clean     deterministic text cleanup
//!  ├─ 4. Page PDF  "Page N" + text in a fetched Unicode font (Courier fallback)
//!  └─ 5. Merge     all page PDFs → combined_text.pdf, interim files removed
//! ```
//!
//! Every step is reported as a [`ProgressEvent`]; the last event of a run is
//! always `DONE`, `Error: …` or the cancellation notice.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfocr_stream::{process_document, Language, NoopProgress, Pipeline, PipelineConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(PipelineConfig::default())?;
//!     let outcome = process_document(
//!         &pipeline,
//!         Path::new("scan.pdf"),
//!         Language::English,
//!         Path::new("output"),
//!         &NoopProgress,
//!     )
//!     .await?;
//!     println!("{} pages → {}", outcome.page_count, outcome.combined_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature     | Default | Description |
//! |-------------|---------|-------------|
//! | `cli`       | on      | Enables the `pdfocr` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `local-ocr` | on      | Offline English OCR via `ocrs` / `rten` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod server;
pub mod session;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Language, OcrBackend, PageFailurePolicy, PipelineConfig, PipelineConfigBuilder, Script,
    ServerConfig,
};
pub use error::{ErrorKind, PipelineError};
pub use output::{PageSummary, ProcessOutcome};
pub use process::{process_document, CancelFlag, Pipeline, ProcessJob, COMBINED_FILE_NAME};
pub use progress::{NoopProgress, ProgressEvent, ProgressSink, DONE_SENTINEL};
pub use server::{router, serve, AppState};
pub use stream::{process_stream, sse_frame, EventStream, RunHandle};

//! Error types for the pdfocr-stream library.
//!
//! Every failure is a variant of [`PipelineError`], one variant per failure
//! class, so that callers can tell a recoverable condition from a fatal one
//! without parsing messages:
//!
//! * request-level: [`PipelineError::Validation`], [`PipelineError::NotFound`],
//!   [`PipelineError::Busy`]: raised before any pipeline state exists;
//! * page-level: the three OCR variants and [`PipelineError::Encoding`];
//!   the page-failure policy decides whether they end the run;
//! * run-level: [`PipelineError::Rasterization`], [`PipelineError::Merge`],
//!   [`PipelineError::Cancelled`].
//!
//! A missing or unusable font is not an error: it is
//! downgraded to the built-in Courier font by [`crate::pipeline::page_pdf`].

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the pdfocr-stream library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Request errors ────────────────────────────────────────────────────
    /// Bad upload: missing file, disallowed extension, oversize, not a PDF.
    #[error("{0}")]
    Validation(String),

    /// Download or processing requested before the artifact exists.
    #[error("{0}")]
    NotFound(String),

    /// A run is already in flight for this session.
    #[error("Processing is already running for session {session}")]
    Busy { session: String },

    // ── Source document errors ────────────────────────────────────────────
    /// The source document is unreadable, corrupt or empty.
    #[error("Rasterisation failed for '{path}': {detail}")]
    Rasterization { path: PathBuf, detail: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The local OCR engine failed (model missing, unreadable image, …).
    #[error("Page {page}: OCR engine error: {detail}")]
    OcrEngine { page: usize, detail: String },

    /// The cloud OCR service answered with a non-success status.
    #[error("Page {page}: OCR service returned {status}: {message}")]
    OcrService {
        page: usize,
        status: u16,
        message: String,
    },

    /// The cloud OCR service could not be reached.
    #[error("Page {page}: OCR network error: {detail}")]
    OcrNetwork { page: usize, detail: String },

    // ── Artifact errors ───────────────────────────────────────────────────
    /// Writing a page PDF failed.
    #[error("Page {page}: failed to write page PDF '{path}': {detail}")]
    Encoding {
        page: usize,
        path: PathBuf,
        detail: String,
    },

    /// Combining the page PDFs failed; no combined file was written.
    #[error("Merge failed: {detail}")]
    Merge { detail: String },

    // ── Control flow ──────────────────────────────────────────────────────
    /// The run was cancelled before it finished.
    #[error("Processing cancelled")]
    Cancelled,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Busy,
    Rasterization,
    OcrEngine,
    OcrService,
    OcrNetwork,
    Encoding,
    Merge,
    Cancelled,
    Config,
    Internal,
}

impl PipelineError {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Busy { .. } => ErrorKind::Busy,
            PipelineError::Rasterization { .. } => ErrorKind::Rasterization,
            PipelineError::OcrEngine { .. } => ErrorKind::OcrEngine,
            PipelineError::OcrService { .. } => ErrorKind::OcrService,
            PipelineError::OcrNetwork { .. } => ErrorKind::OcrNetwork,
            PipelineError::Encoding { .. } => ErrorKind::Encoding,
            PipelineError::Merge { .. } => ErrorKind::Merge,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::InvalidConfig(_) => ErrorKind::Config,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for failures scoped to a single page, which a
    /// [`crate::config::PageFailurePolicy::SkipPage`] run may absorb.
    pub fn is_page_level(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::OcrEngine
                | ErrorKind::OcrService
                | ErrorKind::OcrNetwork
                | ErrorKind::Encoding
        )
    }

    /// True for cloud failures worth retrying: transport errors, throttling
    /// and server-side 5xx answers.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::OcrNetwork { .. } => true,
            PipelineError::OcrService { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

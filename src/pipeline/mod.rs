//! Pipeline stages for page-wise OCR of a scanned PDF.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the orchestrator in [`crate::process`] only
//! wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ ocr ──▶ postprocess ──▶ page_pdf ──▶ merge
//! (upload)  (pdfium)  (ocrs /   (cleanup)     (printpdf)   (lopdf)
//!                      Vision)
//! ```
//!
//! 1. [`input`]: validate and stage uploads
//! 2. [`render`]: rasterise one page at a time on a blocking thread
//! 3. [`ocr`]: extract text with the local engine or the cloud service;
//!    [`encode`] prepares the PNG payload for the latter
//! 4. [`postprocess`]: deterministic cleanup of the recognised text
//! 5. [`page_pdf`]: write the text into a single-page PDF artifact
//! 6. [`merge`]: concatenate the artifacts into the combined PDF
//!
//! [`image_pdf`] is the separate image → PDF path used by the HTTP service.

pub mod encode;
pub mod image_pdf;
pub mod input;
pub mod merge;
pub mod ocr;
pub mod page_pdf;
pub mod postprocess;
pub mod render;

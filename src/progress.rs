//! Progress events emitted by a processing run.
//!
//! The orchestrator pushes [`ProgressEvent`]s into a [`ProgressSink`] in the
//! exact order they happen. The sink decides where they go: a Tokio channel
//! drained by the HTTP layer, a terminal progress bar, or nowhere. The
//! orchestrator never buffers: each event is handed over as soon as it is
//! produced.
//!
//! Each event renders (via `Display`) to the human-readable line shown to the
//! browser; the wire framing lives in [`crate::stream`].
//!
//! # Example
//!
//! ```rust
//! use pdfocr_stream::{ProgressEvent, ProgressSink};
//! use std::sync::Mutex;
//!
//! struct Lines(Mutex<Vec<String>>);
//!
//! impl ProgressSink for Lines {
//!     fn emit(&self, event: ProgressEvent) {
//!         self.0.lock().unwrap().push(event.to_string());
//!     }
//! }
//!
//! let sink = Lines(Mutex::new(Vec::new()));
//! sink.emit(ProgressEvent::PageStarted { page: 1 });
//! assert_eq!(sink.0.lock().unwrap()[0], "Processing page 1...");
//! ```

use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

/// Literal message of the terminal success event.
pub const DONE_SENTINEL: &str = "DONE";

/// Which memory snapshot a [`ProgressEvent::Memory`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStage {
    Initial,
    Current,
    Final,
}

/// One step of a processing run, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The run has begun.
    Started,
    /// Resident memory of this process, in MiB (`None` when unavailable).
    Memory { stage: MemoryStage, mb: Option<f64> },
    /// The source document was opened.
    PageCount { pages: usize },
    /// The Unicode font could not be used; pages fall back to Courier.
    FontFallback { reason: String },
    /// OCR for a page is about to start.
    PageStarted { page: usize },
    /// OCR for a page finished.
    PageExtracted { page: usize, chars: usize },
    /// A page failed but the run continues (skip-page policy).
    PageFailed { page: usize, error: String },
    /// Some characters of a page had no glyph in the page font and were
    /// written as `?`.
    GlyphsMissing { page: usize, count: usize },
    /// The page's interim PDF is on disk.
    PageSaved { page: usize },
    /// All pages are done; merging starts.
    Merging,
    /// The combined PDF was committed.
    CombinedSaved { path: PathBuf },
    /// Terminal: success.
    Done,
    /// Terminal: the run failed.
    Failed { message: String },
    /// Terminal: the run was cancelled.
    Cancelled,
}

impl ProgressEvent {
    /// True for the three events that end a run's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Done | ProgressEvent::Failed { .. } | ProgressEvent::Cancelled
        )
    }

    /// Page number this event belongs to, if any.
    pub fn page(&self) -> Option<usize> {
        match self {
            ProgressEvent::PageStarted { page }
            | ProgressEvent::PageExtracted { page, .. }
            | ProgressEvent::PageFailed { page, .. }
            | ProgressEvent::GlyphsMissing { page, .. }
            | ProgressEvent::PageSaved { page } => Some(*page),
            _ => None,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Started => f.write_str("Starting PDF processing..."),
            ProgressEvent::Memory { stage, mb } => {
                let label = match stage {
                    MemoryStage::Initial => "Initial",
                    MemoryStage::Current => "Current",
                    MemoryStage::Final => "Final",
                };
                match mb {
                    Some(mb) => write!(f, "{label} RAM usage: {mb:.2} MB"),
                    None => write!(f, "{label} RAM usage: unavailable"),
                }
            }
            ProgressEvent::PageCount { pages } => write!(f, "PDF contains {pages} page(s)."),
            ProgressEvent::FontFallback { reason } => write!(
                f,
                "Font unavailable ({reason}); using built-in Courier, non-Latin text may not render."
            ),
            ProgressEvent::PageStarted { page } => write!(f, "Processing page {page}..."),
            ProgressEvent::PageExtracted { page, chars } => write!(
                f,
                "Page {page} processed. Text length: {chars} characters."
            ),
            ProgressEvent::PageFailed { page, error } => {
                write!(f, "Page {page} failed, continuing with an empty page: {error}")
            }
            ProgressEvent::GlyphsMissing { page, count } => write!(
                f,
                "Page {page}: {count} character(s) not covered by the font were written as '?'."
            ),
            ProgressEvent::PageSaved { page } => write!(f, "Interim PDF for page {page} saved."),
            ProgressEvent::Merging => f.write_str("Combining all pages into a single PDF..."),
            ProgressEvent::CombinedSaved { path } => {
                write!(f, "Combined PDF saved to {}.", path.display())
            }
            ProgressEvent::Done => f.write_str(DONE_SENTINEL),
            ProgressEvent::Failed { message } => write!(f, "Error: {message}"),
            ProgressEvent::Cancelled => {
                f.write_str("Cancelled: processing stopped before completion.")
            }
        }
    }
}

/// Receives progress events from a run.
///
/// Implementations must be `Send + Sync`; the run executes on a Tokio task.
pub trait ProgressSink: Send + Sync {
    /// Deliver one event. Must not block for long.
    fn emit(&self, event: ProgressEvent);

    /// True once nobody is listening any more; the orchestrator treats this
    /// as a cancellation request.
    fn is_closed(&self) -> bool {
        false
    }
}

/// A sink that drops every event.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A closed receiver is reported through `is_closed`.
        let _ = self.send(event);
    }

    fn is_closed(&self) -> bool {
        UnboundedSender::is_closed(self)
    }
}

// ── Memory telemetry ─────────────────────────────────────────────────────

/// Resident set size of this process in MiB, or `None` where the platform
/// does not expose it.
pub fn resident_memory_mb() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_kib(&status).map(|kib| kib as f64 / 1024.0)
}

/// Extract the `VmRSS:` value (in KiB) from a `/proc/<pid>/status` body.
fn parse_vm_rss_kib(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_stream_format() {
        assert_eq!(ProgressEvent::Started.to_string(), "Starting PDF processing...");
        assert_eq!(
            ProgressEvent::PageCount { pages: 3 }.to_string(),
            "PDF contains 3 page(s)."
        );
        assert_eq!(
            ProgressEvent::PageExtracted { page: 2, chars: 41 }.to_string(),
            "Page 2 processed. Text length: 41 characters."
        );
        assert_eq!(ProgressEvent::Done.to_string(), "DONE");
        assert_eq!(
            ProgressEvent::Failed { message: "boom".into() }.to_string(),
            "Error: boom"
        );
    }

    #[test]
    fn memory_event_formats_two_decimals() {
        let e = ProgressEvent::Memory { stage: MemoryStage::Initial, mb: Some(12.3456) };
        assert_eq!(e.to_string(), "Initial RAM usage: 12.35 MB");
        let e = ProgressEvent::Memory { stage: MemoryStage::Final, mb: None };
        assert_eq!(e.to_string(), "Final RAM usage: unavailable");
    }

    #[test]
    fn terminal_events() {
        assert!(ProgressEvent::Done.is_terminal());
        assert!(ProgressEvent::Cancelled.is_terminal());
        assert!(ProgressEvent::Failed { message: String::new() }.is_terminal());
        assert!(!ProgressEvent::Merging.is_terminal());
    }

    #[test]
    fn parses_vm_rss() {
        let status = "Name:\tpdfocr\nVmPeak:\t  9000 kB\nVmRSS:\t   20480 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss_kib(status), Some(20480));
        assert_eq!(parse_vm_rss_kib("Name: x\n"), None);
    }

    #[tokio::test]
    async fn channel_sink_reports_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
        tx.emit(ProgressEvent::Started);
        assert!(!ProgressSink::is_closed(&tx));
        drop(rx);
        assert!(ProgressSink::is_closed(&tx));
        // Emitting into a closed channel must not panic.
        tx.emit(ProgressEvent::Done);
    }
}

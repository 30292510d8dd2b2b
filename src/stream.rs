//! Streaming processing API: progress events as they happen.
//!
//! [`process_stream`] spawns a run on the Tokio runtime and hands back a
//! `Stream` of [`ProgressEvent`]s fed by an unbounded channel the
//! orchestrator writes into. Nothing is batched: each event is readable as
//! soon as the orchestrator emits it, and the stream ends right after the
//! terminal event.
//!
//! Dropping the stream closes the channel, which the orchestrator treats as
//! cancellation at its next checkpoint (interim files are still removed).
//!
//! The wire form used by the HTTP layer is one `data: <message>\n\n` frame
//! per event, see [`sse_frame`].

use crate::error::PipelineError;
use crate::output::ProcessOutcome;
use crate::process::{CancelFlag, Pipeline, ProcessJob};
use crate::progress::ProgressEvent;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::debug;

/// A boxed stream of progress events.
pub type EventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// A run in flight.
pub struct RunHandle {
    /// Events in emission order; ends after the terminal event.
    pub events: EventStream,
    /// Raise to stop the run at its next checkpoint.
    pub cancel: CancelFlag,
    /// Resolves to the run's outcome once it finished.
    pub outcome: JoinHandle<Result<ProcessOutcome, PipelineError>>,
}

/// Start processing `job` in the background.
///
/// Must be called from within a Tokio runtime.
pub fn process_stream(pipeline: Arc<Pipeline>, job: ProcessJob, cancel: CancelFlag) -> RunHandle {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let run_cancel = cancel.clone();

    let outcome = tokio::spawn(async move {
        let result = pipeline.run(&job, &tx, &run_cancel).await;
        debug!(ok = result.is_ok(), "Run finished, closing event channel");
        result
    });

    RunHandle {
        events: Box::pin(UnboundedReceiverStream::new(rx)),
        cancel,
        outcome,
    }
}

/// Single-line message of `event`: line breaks inside messages (error
/// details from remote services) are folded into spaces so one event is
/// always exactly one frame.
pub fn wire_message(event: &ProgressEvent) -> String {
    event
        .to_string()
        .split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Server-sent-events frame for `event`: `data: <message>\n\n`.
pub fn sse_frame(event: &ProgressEvent) -> String {
    format!("data: {}\n\n", wire_message(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_match_wire_format() {
        assert_eq!(sse_frame(&ProgressEvent::Done), "data: DONE\n\n");
        assert_eq!(
            sse_frame(&ProgressEvent::PageStarted { page: 7 }),
            "data: Processing page 7...\n\n"
        );
    }

    #[test]
    fn multi_line_errors_become_one_frame() {
        let event = ProgressEvent::Failed {
            message: "remote said:\r\nquota exceeded\n".into(),
        };
        assert_eq!(sse_frame(&event), "data: Error: remote said: quota exceeded\n\n");
    }
}

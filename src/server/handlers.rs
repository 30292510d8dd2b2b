//! Request handlers.

use super::{AppState, SESSION_COOKIE};
use crate::config::Language;
use crate::error::PipelineError;
use crate::pipeline::image_pdf::{images_to_pdf, output_file_name, NamedImage, DEFAULT_RESIZE};
use crate::pipeline::input::{
    stage_upload, validate_image_upload, validate_merge_upload, validate_pdf_upload,
};
use crate::pipeline::merge::merge_bytes;
use crate::process::{ProcessJob, COMBINED_FILE_NAME};
use crate::progress::ProgressEvent;
use crate::session::SessionInfo;
use crate::stream::{process_stream, sse_frame, EventStream};
use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, Multipart, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

/// Name of the staged source document inside a session's upload directory.
const UPLOADED_FILE_NAME: &str = "uploaded_file.pdf";

// ============================================================================
// Session lookup
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    session: Option<String>,
}

/// Session id from `?session=`, else from the session cookie.
fn requested_session(headers: &HeaderMap, query: &SessionQuery) -> Option<Uuid> {
    if let Some(id) = query.session.as_deref().and_then(|s| Uuid::parse_str(s.trim()).ok()) {
        return Some(id);
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

fn multipart_error(e: MultipartError) -> PipelineError {
    PipelineError::Validation(format!("Failed to read upload: {e}"))
}

fn attachment(file_name: &str, bytes: Vec<u8>) -> Response {
    let safe_name: String = file_name
        .chars()
        .filter(|c| (c.is_ascii_graphic() && *c != '"' && *c != '\\') || *c == ' ')
        .collect();
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{safe_name}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

// ============================================================================
// Pages
// ============================================================================

pub async fn index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions().len().await,
    })
}

// ============================================================================
// Upload
// ============================================================================

#[derive(Serialize)]
pub struct UploadResponse {
    message: &'static str,
    session: Uuid,
    language: Language,
}

/// POST /upload: fields `file` (the PDF) and `lang` (default `english`).
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    mut multipart: Multipart,
) -> Result<Response, PipelineError> {
    let mut file: Option<(Option<String>, Bytes)> = None;
    let mut lang: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((name, bytes));
            }
            "lang" => lang = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let (name, bytes) = file.ok_or_else(|| PipelineError::Validation("No file uploaded".into()))?;
    validate_pdf_upload(name.as_deref(), &bytes, state.config().max_upload_bytes)?;
    let language: Language = lang.as_deref().unwrap_or("english").parse()?;

    let id = requested_session(&headers, &query).unwrap_or_else(Uuid::new_v4);
    if state.sessions().is_processing(id).await {
        return Err(PipelineError::Busy {
            session: id.to_string(),
        });
    }

    let upload_dir = state.config().upload_dir.join(id.to_string());
    let document = stage_upload(&upload_dir, UPLOADED_FILE_NAME, &bytes).await?;
    state
        .sessions()
        .record_upload(SessionInfo {
            id,
            document,
            language,
            work_dir: state.config().output_dir.join(id.to_string()),
        })
        .await?;

    tracing::info!(session = %id, %language, bytes = bytes.len(), "PDF uploaded");

    let cookie = format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax");
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(UploadResponse {
            message: "File uploaded successfully",
            session: id,
            language,
        }),
    )
        .into_response())
}

// ============================================================================
// Process / Cancel / Download
// ============================================================================

fn event_stream_response(events: EventStream) -> Response {
    let frames = events.map(|event| Ok::<_, Infallible>(sse_frame(&event)));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

/// A stream holding a single `Error: …` frame.
fn failed_stream(message: String) -> Response {
    let events: EventStream = Box::pin(futures::stream::once(async move {
        ProgressEvent::Failed { message }
    }));
    event_stream_response(events)
}

/// GET /process: run the pipeline on the session's upload, streaming one
/// `data: <message>\n\n` frame per progress event.
///
/// A missing upload is reported inside the stream so EventSource clients
/// see the message; a run already in flight is a 409.
pub async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Response {
    let Some(id) = state.sessions().resolve(requested_session(&headers, &query)).await else {
        return failed_stream("File not found.".into());
    };

    let (info, cancel) = match state.sessions().begin_processing(id).await {
        Ok(started) => started,
        Err(PipelineError::NotFound(message)) => return failed_stream(message),
        Err(e) => return e.into_response(),
    };
    if !info.document.exists() {
        state.sessions().finish_processing(id).await;
        return failed_stream("File not found.".into());
    }

    tracing::info!(session = %id, language = %info.language, "Processing started");
    let job = ProcessJob::in_dir(info.document, info.language, info.work_dir);
    let run = process_stream(state.pipeline().clone(), job, cancel);

    let sessions = state.sessions().clone();
    let outcome = run.outcome;
    tokio::spawn(async move {
        match outcome.await {
            Ok(Ok(out)) => tracing::info!(
                session = %id,
                pages = out.page_count,
                ms = out.total_duration_ms,
                "Processing finished"
            ),
            Ok(Err(e)) => tracing::warn!(session = %id, "Processing ended: {e}"),
            Err(e) => tracing::error!(session = %id, "Processing task aborted: {e}"),
        }
        sessions.finish_processing(id).await;
    });

    event_stream_response(run.events)
}

#[derive(Serialize)]
pub struct CancelResponse {
    cancelled: bool,
}

/// POST /cancel: stop the session's run at its next checkpoint.
pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Json<CancelResponse> {
    let cancelled = match state.sessions().resolve(requested_session(&headers, &query)).await {
        Some(id) => state.sessions().cancel(id).await,
        None => false,
    };
    Json(CancelResponse { cancelled })
}

/// GET /download: the session's combined PDF as an attachment.
pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Result<Response, PipelineError> {
    let not_found = || PipelineError::NotFound("Combined PDF file not found.".into());

    let id = state
        .sessions()
        .resolve(requested_session(&headers, &query))
        .await
        .ok_or_else(not_found)?;
    let info = state.sessions().get(id).await.ok_or_else(not_found)?;

    // The combined file is only ever replaced by rename, so a read during a
    // run sees either the previous or the new document.
    let bytes = tokio::fs::read(info.work_dir.join(COMBINED_FILE_NAME))
        .await
        .map_err(|_| not_found())?;
    Ok(attachment(COMBINED_FILE_NAME, bytes))
}

// ============================================================================
// Image → PDF
// ============================================================================

fn parse_dimension(value: &str, field: &str) -> Result<u32, PipelineError> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| PipelineError::Validation(format!("Invalid {field}: '{}'", value.trim())))
}

/// POST /api/convert-to-pdf: fields `images` (repeated), `resize`,
/// `width`, `height` and `output_name`.
pub async fn convert_to_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, PipelineError> {
    let config = state.config();
    let mut saw_images = false;
    let mut images = Vec::new();
    let mut resize = false;
    let (mut width, mut height) = (DEFAULT_RESIZE, DEFAULT_RESIZE);
    let mut output_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "images" => {
                saw_images = true;
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if name.is_empty() {
                    continue;
                }
                validate_image_upload(
                    &name,
                    &bytes,
                    &config.allowed_image_extensions,
                    config.max_upload_bytes,
                )?;
                images.push(NamedImage {
                    name,
                    bytes: bytes.to_vec(),
                });
            }
            "resize" => {
                resize = field
                    .text()
                    .await
                    .map_err(multipart_error)?
                    .trim()
                    .eq_ignore_ascii_case("true");
            }
            "width" => {
                let raw = field.text().await.map_err(multipart_error)?;
                width = parse_dimension(&raw, "width")?;
            }
            "height" => {
                let raw = field.text().await.map_err(multipart_error)?;
                height = parse_dimension(&raw, "height")?;
            }
            "output_name" => output_name = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    if !saw_images {
        return Err(PipelineError::Validation("No images uploaded".into()));
    }
    if images.is_empty() {
        return Err(PipelineError::Validation("No files selected".into()));
    }

    let file_name = output_file_name(output_name.as_deref(), &images[0].name);
    let bounds = resize.then_some((width, height));
    tracing::info!(images = images.len(), ?bounds, %file_name, "Converting images to PDF");

    let pdf = tokio::task::spawn_blocking(move || images_to_pdf(&images, bounds))
        .await
        .map_err(|e| PipelineError::Internal(format!("conversion task failed: {e}")))??;
    Ok(attachment(&file_name, pdf))
}

// ============================================================================
// Merge PDFs
// ============================================================================

/// POST /api/merge-pdfs: field `pdfs` (repeated), merged in upload order.
pub async fn merge_pdfs(mut multipart: Multipart) -> Result<Response, PipelineError> {
    let mut inputs: Vec<Vec<u8>> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("pdfs") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        validate_merge_upload(&name)?;
        inputs.push(bytes.to_vec());
    }

    if inputs.is_empty() {
        return Err(PipelineError::Validation("No PDF files uploaded".into()));
    }

    tracing::info!(files = inputs.len(), "Merging uploaded PDFs");
    let merged = tokio::task::spawn_blocking(move || merge_bytes(&inputs))
        .await
        .map_err(|e| PipelineError::Internal(format!("merge task failed: {e}")))??;
    Ok(attachment("merged.pdf", merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn session_from_cookie_or_query() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE}={id}")).unwrap(),
        );
        assert_eq!(requested_session(&headers, &SessionQuery::default()), Some(id));

        let other = Uuid::new_v4();
        let query = SessionQuery {
            session: Some(other.to_string()),
        };
        assert_eq!(requested_session(&headers, &query), Some(other));
    }

    #[test]
    fn malformed_session_ids_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("pdfocr_session=nope"));
        let query = SessionQuery {
            session: Some("also-nope".into()),
        };
        assert_eq!(requested_session(&headers, &query), None);
    }

    #[test]
    fn dimensions_must_be_positive_integers() {
        assert_eq!(parse_dimension(" 800 ", "width").unwrap(), 800);
        assert!(parse_dimension("0", "width").is_err());
        assert!(parse_dimension("wide", "height").is_err());
    }

    #[test]
    fn attachment_name_is_header_safe() {
        let resp = attachment("scan \"final\".pdf", vec![1, 2, 3]);
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert_eq!(disposition, "attachment; filename=\"scan final.pdf\"");
    }
}

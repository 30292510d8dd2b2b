//! HTTP service.
//!
//! Endpoints:
//! - GET  /                     - upload form with a live progress log
//! - POST /upload               - stage a PDF + language for the session
//! - GET  /process              - run the pipeline, streaming `data: …` frames
//! - POST /cancel               - stop the session's running job
//! - GET  /download             - the session's combined PDF
//! - POST /api/convert-to-pdf   - images → PDF
//! - POST /api/merge-pdfs       - PDFs → one PDF
//! - GET  /health               - liveness
//!
//! The session id travels in the `pdfocr_session` cookie (set by `/upload`)
//! or the `?session=` query parameter; without either, the most recent
//! upload is used.

mod handlers;

use crate::config::ServerConfig;
use crate::error::{ErrorKind, PipelineError};
use crate::process::Pipeline;
use crate::session::SessionStore;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "pdfocr_session";

/// How often idle sessions are swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// State
// ============================================================================

/// Shared state of all handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
    sessions: SessionStore,
}

impl AppState {
    /// State with the production pipeline built from `config`.
    pub fn from_config(config: ServerConfig) -> Result<Self, PipelineError> {
        let pipeline = Pipeline::new(config.pipeline.clone())?.with_font_dir(config.font_dir());
        Ok(Self::new(config, Arc::new(pipeline)))
    }

    /// State around an existing pipeline.
    pub fn new(config: ServerConfig, pipeline: Arc<Pipeline>) -> Self {
        let sessions = SessionStore::new(Duration::from_secs(config.session_ttl_secs));
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pipeline,
                sessions,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// Drop expired sessions and delete their upload and work directories.
    pub async fn purge_expired_sessions(&self) -> usize {
        let expired = self.sessions().purge_expired().await;
        for session in &expired {
            if let Some(upload_dir) = session.document.parent() {
                let _ = tokio::fs::remove_dir_all(upload_dir).await;
            }
            let _ = tokio::fs::remove_dir_all(&session.work_dir).await;
        }
        expired.len()
    }
}

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: ErrorKind,
}

impl PipelineError {
    /// HTTP status for this error when it ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Busy => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = ?self.kind(), "Request failed: {self}");
        }
        let body = Json(ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router.
pub fn router(state: AppState) -> Result<Router, PipelineError> {
    let cors = cors_layer(state.config().cors_origin.as_deref())?;
    // Multi-file endpoints carry several files of up to the per-file limit.
    let body_limit = state.config().max_upload_bytes.saturating_mul(8);

    Ok(Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/upload", post(handlers::upload))
        .route("/process", get(handlers::process))
        .route("/cancel", post(handlers::cancel))
        .route("/download", get(handlers::download))
        .route("/api/convert-to-pdf", post(handlers::convert_to_pdf))
        .route("/api/merge-pdfs", post(handlers::merge_pdfs))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

fn cors_layer(origin: Option<&str>) -> Result<CorsLayer, PipelineError> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin {
        None => Ok(layer.allow_origin(Any)),
        Some(origin) => {
            let value = HeaderValue::from_str(origin).map_err(|e| {
                PipelineError::InvalidConfig(format!("CORS origin '{origin}': {e}"))
            })?;
            Ok(layer.allow_origin(AllowOrigin::exact(value)))
        }
    }
}

/// Bind `config.bind` and serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<(), PipelineError> {
    for dir in [&config.upload_dir, &config.output_dir] {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            PipelineError::Internal(format!("cannot create '{}': {e}", dir.display()))
        })?;
    }

    let bind = config.bind.clone();
    let state = AppState::from_config(config)?;
    let app = router(state.clone())?;

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            sweeper.purge_expired_sessions().await;
        }
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| PipelineError::Internal(format!("cannot bind {bind}: {e}")))?;
    tracing::info!("pdfocr listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| PipelineError::Internal(format!("server error: {e}")))?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Ctrl-C handler unavailable: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            PipelineError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(PipelineError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            PipelineError::Busy { session: "s".into() }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PipelineError::Merge { detail: "x".into() }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bad_cors_origin_is_config_error() {
        assert!(cors_layer(Some("https://example.org")).is_ok());
        assert!(matches!(
            cors_layer(Some("bad\norigin")),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}

//! Offline OCR backend built on the `ocrs` engine.
//!
//! The engine needs two model files, `text-detection.rten` and
//! `text-recognition.rten`. They are loaded on the first page of the first
//! run and then shared; loading takes a few seconds, recognition is
//! CPU-bound, so both happen on the blocking pool.
//!
//! Without the `local-ocr` feature the backend still exists but every call
//! fails with [`PipelineError::OcrEngine`].

use super::TextExtractor;
use crate::config::{Language, OcrBackend};
use crate::error::PipelineError;
use async_trait::async_trait;
use image::DynamicImage;
use std::path::PathBuf;

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `<user cache dir>/ocrs`, which is where `ocrs-cli` downloads its models.
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("ocrs"))
        .unwrap_or_else(|| PathBuf::from("ocrs-models"))
}

/// Local [`TextExtractor`].
pub struct LocalOcr {
    model_dir: PathBuf,
    #[cfg(feature = "local-ocr")]
    engine: tokio::sync::OnceCell<std::sync::Arc<ocrs::OcrEngine>>,
}

impl LocalOcr {
    /// Use models from `model_dir`, or [`default_model_dir`] when `None`.
    pub fn new(model_dir: Option<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.unwrap_or_else(default_model_dir),
            #[cfg(feature = "local-ocr")]
            engine: tokio::sync::OnceCell::new(),
        }
    }

    pub fn model_dir(&self) -> &std::path::Path {
        &self.model_dir
    }
}

#[cfg(feature = "local-ocr")]
mod ocrs_engine {
    use super::*;
    use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
    use rten::Model;
    use std::path::Path;
    use std::sync::Arc;
    use tracing::{debug, info};

    pub(super) fn load(dir: &Path, page: usize) -> Result<OcrEngine, PipelineError> {
        let engine_err = |detail: String| PipelineError::OcrEngine { page, detail };

        let load_model = |name: &str| {
            let path = dir.join(name);
            if !path.exists() {
                return Err(engine_err(format!(
                    "model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
            Model::load_file(&path)
                .map_err(|e| engine_err(format!("failed to load {}: {e}", path.display())))
        };

        info!(dir = %dir.display(), "Loading OCR models");
        let detection_model = load_model(DETECTION_MODEL_FILENAME)?;
        let recognition_model = load_model(RECOGNITION_MODEL_FILENAME)?;

        OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|e| engine_err(format!("failed to initialise OCR engine: {e}")))
    }

    pub(super) fn recognise(
        engine: &Arc<OcrEngine>,
        page: usize,
        rgb: image::RgbImage,
    ) -> Result<String, PipelineError> {
        let engine_err = |detail: String| PipelineError::OcrEngine { page, detail };
        let (width, height) = rgb.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))
            .map_err(|e| engine_err(format!("bad image ({width}x{height}): {e}")))?;
        let input = engine
            .prepare_input(source)
            .map_err(|e| engine_err(format!("preprocessing failed: {e}")))?;
        let text = engine
            .get_text(&input)
            .map_err(|e| engine_err(format!("recognition failed: {e}")))?;

        debug!(page, lines = text.lines().count(), "Local OCR complete");
        Ok(text)
    }
}

#[async_trait]
impl TextExtractor for LocalOcr {
    fn backend(&self) -> OcrBackend {
        OcrBackend::Local
    }

    #[cfg(feature = "local-ocr")]
    async fn extract(
        &self,
        page: usize,
        image: &DynamicImage,
        _language: Language,
    ) -> Result<String, PipelineError> {
        use std::sync::Arc;

        let join_err = |e: tokio::task::JoinError| PipelineError::OcrEngine {
            page,
            detail: format!("OCR task panicked: {e}"),
        };

        let engine = self
            .engine
            .get_or_try_init(|| async {
                let dir = self.model_dir.clone();
                tokio::task::spawn_blocking(move || ocrs_engine::load(&dir, page))
                    .await
                    .map_err(join_err)?
                    .map(Arc::new)
            })
            .await?;

        let engine = Arc::clone(engine);
        let rgb = image.to_rgb8();
        tokio::task::spawn_blocking(move || ocrs_engine::recognise(&engine, page, rgb))
            .await
            .map_err(join_err)?
    }

    #[cfg(not(feature = "local-ocr"))]
    async fn extract(
        &self,
        page: usize,
        _image: &DynamicImage,
        _language: Language,
    ) -> Result<String, PipelineError> {
        Err(PipelineError::OcrEngine {
            page,
            detail: "built without the `local-ocr` feature".into(),
        })
    }
}

//! Cloud OCR backend: Google Cloud Vision `images:annotate` over REST.
//!
//! ## Retry Strategy
//!
//! Transport failures, HTTP 429 and 5xx answers are retried with
//! exponential backoff (`retry_backoff_ms * 2^attempt`); 4xx answers such as
//! a bad key are final on the first try. With 500 ms base and 2 retries the
//! wait sequence is 500 ms → 1 s.

use super::TextExtractor;
use crate::config::{Language, OcrBackend, PipelineConfig};
use crate::error::PipelineError;
use crate::pipeline::encode::encode_png_base64;
use async_trait::async_trait;
use image::DynamicImage;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Cloud [`TextExtractor`].
pub struct CloudOcr {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl CloudOcr {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.vision_endpoint.clone(),
            api_key: config.vision_api_key.clone(),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    async fn annotate_once(
        &self,
        page: usize,
        key: &str,
        body: &serde_json::Value,
    ) -> Result<String, PipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", key)])
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::OcrNetwork {
                page,
                detail: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PipelineError::OcrNetwork {
            page,
            detail: format!("reading response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(PipelineError::OcrService {
                page,
                status: status.as_u16(),
                message: service_message(&text),
            });
        }

        parse_annotate_response(page, &text)
    }
}

/// Request body asking for plain text detection on one image.
pub fn build_request(image_b64: &str, language: Language) -> serde_json::Value {
    json!({
        "requests": [{
            "image": { "content": image_b64 },
            "features": [{ "type": "TEXT_DETECTION" }],
            "imageContext": { "languageHints": [language.hint()] }
        }]
    })
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Status,
}

/// Pull the text out of a successful `images:annotate` answer.
///
/// The first text annotation holds the full page text; no annotation means
/// no text. A per-image `error` is reported as a service failure even
/// though the HTTP status was 200.
fn parse_annotate_response(page: usize, body: &str) -> Result<String, PipelineError> {
    let parsed: AnnotateResponse =
        serde_json::from_str(body).map_err(|e| PipelineError::OcrService {
            page,
            status: 200,
            message: format!("unparseable response: {e}"),
        })?;

    let Some(first) = parsed.responses.into_iter().next() else {
        return Ok(String::new());
    };

    if let Some(err) = first.error.filter(|e| !e.message.is_empty()) {
        return Err(PipelineError::OcrService {
            page,
            status: grpc_to_http(err.code),
            message: err.message,
        });
    }

    Ok(first
        .text_annotations
        .into_iter()
        .next()
        .map(|a| a.description)
        .unwrap_or_default())
}

/// The `error.message` of a Google error envelope, else the raw body.
fn service_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Map the google.rpc status codes a per-image error can carry to HTTP.
fn grpc_to_http(code: i32) -> u16 {
    match code {
        3 | 9 | 11 => 400,
        5 => 404,
        7 => 403,
        8 => 429,
        16 => 401,
        14 => 503,
        4 => 504,
        _ => 500,
    }
}

#[async_trait]
impl TextExtractor for CloudOcr {
    fn backend(&self) -> OcrBackend {
        OcrBackend::Cloud
    }

    async fn extract(
        &self,
        page: usize,
        image: &DynamicImage,
        language: Language,
    ) -> Result<String, PipelineError> {
        let key = self.api_key.as_deref().ok_or_else(|| {
            PipelineError::InvalidConfig(
                "cloud OCR needs an API key (set GOOGLE_VISION_API_KEY)".into(),
            )
        })?;

        let b64 = encode_png_base64(image).map_err(|e| PipelineError::OcrEngine {
            page,
            detail: format!("PNG encoding failed: {e}"),
        })?;
        let body = build_request(&b64, language);

        let mut attempt = 0;
        loop {
            match self.annotate_once(page, key, &body).await {
                Ok(text) => {
                    debug!(page, attempt, chars = text.chars().count(), "Cloud OCR complete");
                    return Ok(text);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.retry_backoff_ms * 2u64.pow(attempt);
                    attempt += 1;
                    warn!(
                        page,
                        "Cloud OCR retry {}/{} after {}ms: {}",
                        attempt,
                        self.max_retries,
                        backoff,
                        e
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_language_hint() {
        let body = build_request("AAAA", Language::Sanskrit);
        let req = &body["requests"][0];
        assert_eq!(req["image"]["content"], "AAAA");
        assert_eq!(req["features"][0]["type"], "TEXT_DETECTION");
        assert_eq!(req["imageContext"]["languageHints"][0], "sa");
    }

    #[test]
    fn first_annotation_is_page_text() {
        let body = r#"{"responses":[{"textAnnotations":[
            {"description":"नमस्ते दुनिया\n"},{"description":"नमस्ते"}]}]}"#;
        assert_eq!(parse_annotate_response(1, body).unwrap(), "नमस्ते दुनिया\n");
    }

    #[test]
    fn no_annotations_is_empty_text() {
        assert_eq!(parse_annotate_response(1, r#"{"responses":[{}]}"#).unwrap(), "");
        assert_eq!(parse_annotate_response(1, "{}").unwrap(), "");
    }

    #[test]
    fn per_image_error_is_service_error() {
        let body = r#"{"responses":[{"error":{"code":3,"message":"Bad image data."}}]}"#;
        match parse_annotate_response(4, body).unwrap_err() {
            PipelineError::OcrService { page, status, message } => {
                assert_eq!((page, status), (4, 400));
                assert_eq!(message, "Bad image data.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn service_message_prefers_envelope() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(service_message(body), "API key not valid.");
        assert_eq!(service_message("  gateway timeout "), "gateway timeout");
    }

    #[tokio::test]
    async fn missing_key_is_a_config_error() {
        let ocr = CloudOcr::from_config(&PipelineConfig::default()).unwrap();
        let img = DynamicImage::new_rgb8(4, 4);
        let err = ocr.extract(1, &img, Language::Hindi).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error_after_retries() {
        let config = PipelineConfig::builder()
            .vision_api_key("test-key")
            .vision_endpoint("http://127.0.0.1:9/v1/images:annotate")
            .max_retries(1)
            .retry_backoff_ms(1)
            .api_timeout_secs(2)
            .build()
            .unwrap();
        let ocr = CloudOcr::from_config(&config).unwrap();
        let img = DynamicImage::new_rgb8(4, 4);

        let err = ocr.extract(2, &img, Language::Hindi).await.unwrap_err();
        assert!(matches!(err, PipelineError::OcrNetwork { page: 2, .. }), "got {err}");
    }
}

//! Configuration types for the OCR pipeline and the HTTP service.
//!
//! Pipeline behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The HTTP layer wraps it in [`ServerConfig`],
//! which adds directories, upload limits and session expiry.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Font fetched for Latin-script page PDFs when nothing else is configured.
pub const DEFAULT_FONT_URL: &str = "https://www.1001fonts.com/download/font/dejavu-sans.book.ttf";

/// File name the Latin font is stored under.
pub const DEFAULT_FONT_FILE: &str = "DejaVuSans.ttf";

/// Font fetched for Devanagari page PDFs. DejaVu Sans has no Devanagari
/// glyphs.
pub const DEVANAGARI_FONT_URL: &str = "https://github.com/notofonts/notofonts.github.io/raw/main/fonts/NotoSansDevanagari/hinted/ttf/NotoSansDevanagari-Regular.ttf";

/// File name the Devanagari font is stored under.
pub const DEVANAGARI_FONT_FILE: &str = "NotoSansDevanagari-Regular.ttf";

/// Google Cloud Vision `images:annotate` endpoint.
pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Configuration for one processing run.
///
/// # Example
/// ```rust
/// use pdfocr_stream::{PageFailurePolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .page_failure_policy(PageFailurePolicy::SkipPage)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Where the font for Latin-script languages is downloaded from.
    pub font_url: String,

    /// Local path of the Latin font. `None` means `<font dir>/DejaVuSans.ttf`,
    /// resolved by the caller that knows the font directory.
    pub font_path: Option<PathBuf>,

    /// Where the font for Devanagari languages is downloaded from.
    pub devanagari_font_url: String,

    /// Local path of the Devanagari font. `None` means
    /// `<font dir>/NotoSansDevanagari-Regular.ttf`.
    pub devanagari_font_path: Option<PathBuf>,

    /// Extra font download attempts before falling back to Courier. Default: 1.
    pub font_fetch_retries: u32,

    /// What to do when one page fails OCR or encoding. Default: fail fast.
    pub page_failure_policy: PageFailurePolicy,

    /// Credential for the cloud OCR backend.
    pub vision_api_key: Option<String>,

    /// Cloud OCR endpoint. Default: [`DEFAULT_VISION_ENDPOINT`].
    pub vision_endpoint: String,

    /// Per-request timeout for the cloud OCR backend, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Retries for transient cloud failures (network, 429, 5xx). Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Directory holding `text-detection.rten` and `text-recognition.rten`
    /// for the local engine. `None` uses the ocrs cache directory.
    pub ocr_model_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            font_url: DEFAULT_FONT_URL.to_string(),
            font_path: None,
            devanagari_font_url: DEVANAGARI_FONT_URL.to_string(),
            devanagari_font_path: None,
            font_fetch_retries: 1,
            page_failure_policy: PageFailurePolicy::default(),
            vision_api_key: None,
            vision_endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            api_timeout_secs: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
            ocr_model_dir: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("font_url", &self.font_url)
            .field("font_path", &self.font_path)
            .field("devanagari_font_url", &self.devanagari_font_url)
            .field("devanagari_font_path", &self.devanagari_font_path)
            .field("font_fetch_retries", &self.font_fetch_retries)
            .field("page_failure_policy", &self.page_failure_policy)
            .field("vision_api_key", &self.vision_api_key.as_ref().map(|_| "<redacted>"))
            .field("vision_endpoint", &self.vision_endpoint)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("ocr_model_dir", &self.ocr_model_dir)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// URL of the font that covers `script`.
    pub fn font_url(&self, script: Script) -> &str {
        match script {
            Script::Latin => &self.font_url,
            Script::Devanagari => &self.devanagari_font_url,
        }
    }

    /// Where the font for `script` is cached, defaulting to its file name
    /// inside `font_dir`.
    pub fn resolved_font_path(&self, font_dir: &Path, script: Script) -> PathBuf {
        let (explicit, file) = match script {
            Script::Latin => (&self.font_path, DEFAULT_FONT_FILE),
            Script::Devanagari => (&self.devanagari_font_path, DEVANAGARI_FONT_FILE),
        };
        explicit.clone().unwrap_or_else(|| font_dir.join(file))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn font_url(mut self, url: impl Into<String>) -> Self {
        self.config.font_url = url.into();
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.font_path = Some(path.into());
        self
    }

    pub fn devanagari_font_url(mut self, url: impl Into<String>) -> Self {
        self.config.devanagari_font_url = url.into();
        self
    }

    pub fn devanagari_font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.devanagari_font_path = Some(path.into());
        self
    }

    pub fn font_fetch_retries(mut self, n: u32) -> Self {
        self.config.font_fetch_retries = n;
        self
    }

    pub fn page_failure_policy(mut self, policy: PageFailurePolicy) -> Self {
        self.config.page_failure_policy = policy;
        self
    }

    pub fn vision_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.vision_api_key = Some(key.into());
        self
    }

    pub fn vision_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.vision_endpoint = url.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn ocr_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.ocr_model_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        let endpoint = &c.vision_endpoint;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(PipelineError::InvalidConfig(format!(
                "Vision endpoint must be an HTTP(S) URL, got '{}'",
                c.vision_endpoint
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Behaviour when OCR or encoding fails on a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageFailurePolicy {
    /// Abort the whole run; no combined PDF is produced. (default)
    #[default]
    FailFast,
    /// Keep going: the page is emitted with an empty body and recorded as
    /// failed in the run summary.
    SkipPage,
}

impl FromStr for PageFailurePolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" | "abort" => Ok(Self::FailFast),
            "skip-page" | "skip" | "continue" => Ok(Self::SkipPage),
            other => Err(PipelineError::InvalidConfig(format!(
                "Unknown page failure policy '{other}' (expected fail-fast or skip-page)"
            ))),
        }
    }
}

/// The OCR implementation a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackend {
    /// Offline engine running in-process.
    Local,
    /// Remote text-detection service.
    Cloud,
}

impl fmt::Display for OcrBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcrBackend::Local => f.write_str("local"),
            OcrBackend::Cloud => f.write_str("cloud"),
        }
    }
}

/// Document language selected at upload time. It fixes the OCR backend for
/// the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Hindi,
    Sanskrit,
}

impl Language {
    /// Every accepted language key, in form order.
    pub const ALL: [Language; 3] = [Language::English, Language::Hindi, Language::Sanskrit];

    /// The key used by the upload form and the CLI.
    pub fn key(self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Hindi => "hindi",
            Language::Sanskrit => "sanskrit",
        }
    }

    /// Latin-script English runs offline; Devanagari languages need the
    /// cloud service.
    pub fn backend(self) -> OcrBackend {
        match self {
            Language::English => OcrBackend::Local,
            Language::Hindi | Language::Sanskrit => OcrBackend::Cloud,
        }
    }

    /// Script the recognised text is written in.
    pub fn script(self) -> Script {
        match self {
            Language::English => Script::Latin,
            Language::Hindi | Language::Sanskrit => Script::Devanagari,
        }
    }

    /// BCP-47 hint passed to the cloud service.
    pub fn hint(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Hindi => "hi",
            Language::Sanskrit => "sa",
        }
    }
}

/// Writing system of a language; selects the page font.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Latin,
    Devanagari,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Language {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|l| l.key() == wanted)
            .ok_or_else(|| {
                PipelineError::Validation(format!(
                    "Unsupported language '{}' (expected one of: english, hindi, sanskrit)",
                    s.trim()
                ))
            })
    }
}

// ── Server configuration ─────────────────────────────────────────────────

/// Settings for the HTTP service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on. Default: `0.0.0.0:3000`.
    pub bind: String,
    /// Directory holding uploaded source documents. Default: `uploads`.
    pub upload_dir: PathBuf,
    /// Directory holding page PDFs, the font and combined output. Default: `output`.
    pub output_dir: PathBuf,
    /// Upload size above which a file is rejected. Default: 50 MiB.
    pub max_upload_bytes: usize,
    /// Lower-case extensions accepted by the image→PDF endpoint.
    pub allowed_image_extensions: Vec<String>,
    /// Idle time after which a session and its files are purged. Default: 1 h.
    pub session_ttl_secs: u64,
    /// Single allowed CORS origin; `None` allows any origin.
    pub cors_origin: Option<String>,
    /// Configuration passed to every processing run.
    pub pipeline: PipelineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("output"),
            max_upload_bytes: 50 * 1024 * 1024,
            allowed_image_extensions: ["png", "jpg", "jpeg", "bmp", "gif"]
                .into_iter()
                .map(String::from)
                .collect(),
            session_ttl_secs: 3600,
            cors_origin: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Directory fetched fonts are cached in.
    pub fn font_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_dpi() {
        let c = PipelineConfig::builder().dpi(10).build().unwrap();
        assert_eq!(c.dpi, 72);
        let c = PipelineConfig::builder().dpi(9000).build().unwrap();
        assert_eq!(c.dpi, 400);
    }

    #[test]
    fn builder_rejects_non_http_endpoint() {
        let err = PipelineConfig::builder()
            .vision_endpoint("ftp://vision")
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = PipelineConfig::builder().vision_api_key("secret-123").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-123"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn language_keys_map_to_backends() {
        assert_eq!("english".parse::<Language>().unwrap().backend(), OcrBackend::Local);
        assert_eq!("Hindi".parse::<Language>().unwrap().backend(), OcrBackend::Cloud);
        assert_eq!(" sanskrit ".parse::<Language>().unwrap(), Language::Sanskrit);
        assert!("klingon".parse::<Language>().is_err());
    }

    #[test]
    fn policy_parses_aliases() {
        assert_eq!("skip".parse::<PageFailurePolicy>().unwrap(), PageFailurePolicy::SkipPage);
        assert_eq!("fail-fast".parse::<PageFailurePolicy>().unwrap(), PageFailurePolicy::FailFast);
        assert!("sometimes".parse::<PageFailurePolicy>().is_err());
    }

    #[test]
    fn font_paths_default_into_output_dir() {
        let s = ServerConfig::default();
        assert_eq!(
            s.pipeline.resolved_font_path(s.font_dir(), Script::Latin),
            PathBuf::from("output").join(DEFAULT_FONT_FILE)
        );
        assert_eq!(
            s.pipeline.resolved_font_path(s.font_dir(), Script::Devanagari),
            PathBuf::from("output").join(DEVANAGARI_FONT_FILE)
        );
    }

    #[test]
    fn devanagari_languages_get_their_own_font() {
        let c = PipelineConfig::default();
        assert_eq!(c.font_url(Language::English.script()), DEFAULT_FONT_URL);
        assert_eq!(c.font_url(Language::Hindi.script()), DEVANAGARI_FONT_URL);
        assert_eq!(c.font_url(Language::Sanskrit.script()), DEVANAGARI_FONT_URL);

        let c = PipelineConfig::builder()
            .devanagari_font_path("/fonts/deva.ttf")
            .build()
            .unwrap();
        assert_eq!(
            c.resolved_font_path(Path::new("/cache"), Script::Devanagari),
            PathBuf::from("/fonts/deva.ttf")
        );
        assert_eq!(
            c.resolved_font_path(Path::new("/cache"), Script::Latin),
            PathBuf::from("/cache").join(DEFAULT_FONT_FILE)
        );
    }
}

//! # font-fetch
//!
//! Download a TrueType/OpenType font from a URL into a local path once, and
//! reuse that copy on every later call, so that PDF writers needing a
//! Unicode-capable font do not refetch it on every run.
//!
//! ## How it works
//!
//! On a call to [`ensure_font`]:
//!
//! 1. If the destination already holds a non-empty font file, it is returned
//!    without touching the network.
//! 2. Otherwise the URL is fetched (blocking), retried `retries` times on
//!    failure, and the body is checked for a font signature.
//! 3. The bytes are written to `<dest>.part` and renamed into place, so a
//!    crashed download never leaves a truncated font behind.
//!
//! Fetching is best-effort from the caller's point of view: every failure is
//! reported as a [`FontFetchError`] and the caller decides on a fallback.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use font_fetch::{ensure_font, FetchOptions};
//! use std::path::Path;
//!
//! let path = ensure_font(
//!     "https://www.1001fonts.com/download/font/dejavu-sans.book.ttf",
//!     Path::new("output/DejaVuSans.ttf"),
//!     &FetchOptions::default(),
//! );
//! match path {
//!     Ok(p) => println!("font ready at {}", p.display()),
//!     Err(e) => eprintln!("falling back to a built-in font: {e}"),
//! }
//! ```
//!
//! ## Environment variable overrides
//!
//! - `FONT_FETCH_CACHE_DIR`: override the default cache directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by font-fetch operations.
#[derive(Error, Debug)]
pub enum FontFetchError {
    /// Could not create the directory that should hold the font.
    #[error("Cache directory error for '{path}': {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Network download failed (after all retries).
    #[error("Download failed after {attempts} attempt(s): {reason}")]
    Download { attempts: u32, reason: String },

    /// The server answered, but the body is not a TrueType/OpenType font.
    #[error("Downloaded file is not a font (first bytes: {magic:?})")]
    NotAFont { magic: Vec<u8> },

    /// Writing the font to disk failed.
    #[error("Failed to write font to '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Knobs for a single [`ensure_font`] call.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Extra attempts after the first failed one. Default: 1.
    pub retries: u32,
    /// Whole-request timeout per attempt. Default: 30 s.
    pub timeout: Duration,
    /// Pause between attempts. Default: 250 ms.
    pub retry_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retries: 1,
            timeout: Duration::from_secs(30),
            retry_delay: Duration::from_millis(250),
        }
    }
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the directory used for fonts when the caller does not pick one.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/pdfocr/fonts/`
/// - **Linux**: `~/.cache/pdfocr/fonts/`
/// - **Windows**: `%LOCALAPPDATA%\pdfocr\fonts\`
///
/// Override by setting `FONT_FETCH_CACHE_DIR`.
pub fn default_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("FONT_FETCH_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("pdfocr").join("fonts")
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns `true` if `path` already holds a usable (non-empty) font file.
pub fn is_font_cached(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Returns `true` when `bytes` start with a TrueType, OpenType or
/// TrueType-collection signature.
pub fn looks_like_font(bytes: &[u8]) -> bool {
    matches!(
        bytes.get(..4),
        Some([0x00, 0x01, 0x00, 0x00]) | Some(b"OTTO") | Some(b"true") | Some(b"ttcf")
    )
}

/// Makes sure the font at `url` is present at `dest`, downloading it if needed.
///
/// # Errors
///
/// Any failure is returned as-is; nothing partial is left at `dest`.
pub fn ensure_font(
    url: &str,
    dest: &Path,
    options: &FetchOptions,
) -> Result<PathBuf, FontFetchError> {
    if is_font_cached(dest) {
        debug!(path = %dest.display(), "Font already cached");
        return Ok(dest.to_path_buf());
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| FontFetchError::CacheDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let attempts = options.retries + 1;
    let mut last_reason = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 {
            warn!(attempt, attempts, "Retrying font download: {last_reason}");
            std::thread::sleep(options.retry_delay);
        }

        match download_bytes(url, options.timeout) {
            Ok(bytes) => {
                if !looks_like_font(&bytes) {
                    return Err(FontFetchError::NotAFont {
                        magic: bytes.iter().take(4).copied().collect(),
                    });
                }
                write_atomically(dest, &bytes)?;
                info!(path = %dest.display(), bytes = bytes.len(), "Font downloaded");
                return Ok(dest.to_path_buf());
            }
            Err(reason) => last_reason = reason,
        }
    }

    Err(FontFetchError::Download {
        attempts,
        reason: last_reason,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Fetches the whole body of `url`.
fn download_bytes(url: &str, timeout: Duration) -> Result<Vec<u8>, String> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("font-fetch/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()
        .map_err(|e| e.to_string())?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| format!("GET {url}: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("HTTP {} for {url}", response.status()));
    }

    let body = response.bytes().map_err(|e| format!("Read error: {e}"))?;
    debug!(url, bytes = body.len(), "Font body received");
    Ok(body.to_vec())
}

fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), FontFetchError> {
    let part = dest.with_extension("part");
    std::fs::write(&part, bytes).map_err(|source| {
        let _ = std::fs::remove_file(&part);
        FontFetchError::Write {
            path: part.clone(),
            source,
        }
    })?;
    std::fs::rename(&part, dest).map_err(|source| {
        let _ = std::fs::remove_file(&part);
        FontFetchError::Write {
            path: dest.to_path_buf(),
            source,
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

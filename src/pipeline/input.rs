//! Upload validation and staging.
//!
//! Every check here runs before any pipeline state exists, so a rejected
//! upload is reported as a [`PipelineError::Validation`] and nothing is
//! written to disk. Accepted uploads are staged with a write-then-rename so
//! a concurrent reader never sees a half-written source document.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lower-case extension of `file_name`, if it has one.
pub fn extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

fn check_size(file_name: &str, len: usize, max_bytes: usize) -> Result<(), PipelineError> {
    if len > max_bytes {
        return Err(PipelineError::Validation(format!(
            "File {file_name} is too large. Maximum size is {}MB.",
            max_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Validate an uploaded source document.
///
/// Checks, in order: a non-empty file name, a `.pdf` extension, the size
/// limit, and the `%PDF` magic bytes.
pub fn validate_pdf_upload(
    file_name: Option<&str>,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<(), PipelineError> {
    let name = file_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| PipelineError::Validation("No file uploaded".into()))?;

    if extension(name).as_deref() != Some("pdf") {
        return Err(PipelineError::Validation("File must be a PDF".into()));
    }
    check_size(name, bytes.len(), max_bytes)?;
    if !bytes.starts_with(b"%PDF") {
        return Err(PipelineError::Validation(format!(
            "File {name} is not a valid PDF"
        )));
    }
    Ok(())
}

/// Validate one image for the image → PDF endpoint.
pub fn validate_image_upload(
    file_name: &str,
    bytes: &[u8],
    allowed_extensions: &[String],
    max_bytes: usize,
) -> Result<(), PipelineError> {
    let allowed = extension(file_name)
        .map(|ext| allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
        .unwrap_or(false);
    if !allowed {
        return Err(PipelineError::Validation(format!(
            "Unsupported file type: {file_name}"
        )));
    }
    check_size(file_name, bytes.len(), max_bytes)
}

/// Validate one input of the merge endpoint (extension only, as the merger
/// itself rejects malformed content).
pub fn validate_merge_upload(file_name: &str) -> Result<(), PipelineError> {
    if extension(file_name).as_deref() == Some("pdf") {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "Unsupported file type: {file_name}"
        )))
    }
}

/// Write `bytes` to `dir/file_name`, creating `dir` when needed.
pub async fn stage_upload(
    dir: &Path,
    file_name: &str,
    bytes: &[u8],
) -> Result<PathBuf, PipelineError> {
    let io_err = |e: std::io::Error| PipelineError::Internal(format!("staging upload: {e}"));

    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    let dest = dir.join(file_name);
    let tmp = dir.join(format!(".{file_name}.part"));
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }

    debug!(path = %dest.display(), bytes = bytes.len(), "Upload staged");
    Ok(dest)
}

/// Validate a local source document given on the command line.
pub fn validate_local_pdf(path: &Path) -> Result<(), PipelineError> {
    use std::io::Read;

    let mut file = std::fs::File::open(path).map_err(|e| {
        PipelineError::Validation(format!("Cannot open {}: {e}", path.display()))
    })?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(PipelineError::Validation(format!(
            "{} is not a PDF",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension("Scan.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension("noext"), None);
        assert_eq!(extension("trailing."), None);
    }

    #[test]
    fn pdf_upload_checks() {
        assert!(validate_pdf_upload(Some("a.pdf"), b"%PDF-1.7 ...", MB).is_ok());

        let missing = validate_pdf_upload(None, b"%PDF", MB).unwrap_err();
        assert_eq!(missing.to_string(), "No file uploaded");

        let wrong = validate_pdf_upload(Some("a.docx"), b"%PDF", MB).unwrap_err();
        assert_eq!(wrong.to_string(), "File must be a PDF");

        let big = vec![b'%'; 2 * MB];
        assert!(validate_pdf_upload(Some("a.pdf"), &big, MB).is_err());

        let fake = validate_pdf_upload(Some("a.pdf"), b"GIF89a", MB).unwrap_err();
        assert!(fake.to_string().contains("not a valid PDF"));
    }

    #[test]
    fn image_upload_checks() {
        let allowed: Vec<String> = vec!["png".into(), "jpg".into()];
        assert!(validate_image_upload("x.PNG", b"..", &allowed, MB).is_ok());
        let err = validate_image_upload("x.tiff", b"..", &allowed, MB).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported file type: x.tiff");
        let err = validate_image_upload("x.png", &vec![0; 2 * MB], &allowed, MB).unwrap_err();
        assert_eq!(err.to_string(), "File x.png is too large. Maximum size is 1MB.");
    }

    #[test]
    fn merge_upload_needs_pdf_extension() {
        assert!(validate_merge_upload("a.pdf").is_ok());
        assert!(validate_merge_upload("a.png").is_err());
    }

    #[tokio::test]
    async fn staging_overwrites_previous_upload() {
        let dir = tempfile::tempdir().unwrap();
        let up = dir.path().join("uploads");
        let p1 = stage_upload(&up, "uploaded_file.pdf", b"%PDF first").await.unwrap();
        let p2 = stage_upload(&up, "uploaded_file.pdf", b"%PDF second").await.unwrap();
        assert_eq!(p1, p2);
        assert_eq!(std::fs::read(&p2).unwrap(), b"%PDF second");
    }

    #[test]
    fn local_pdf_magic() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.pdf");
        let bad = dir.path().join("b.pdf");
        std::fs::write(&good, b"%PDF-1.4").unwrap();
        std::fs::write(&bad, b"hello").unwrap();
        assert!(validate_local_pdf(&good).is_ok());
        assert!(validate_local_pdf(&bad).is_err());
        assert!(validate_local_pdf(&dir.path().join("none.pdf")).is_err());
    }
}

//! Document merging: concatenate PDF artifacts into one document with lopdf.
//!
//! Every input is renumbered into a shared object-id space, its pages are
//! collected in page order (with inherited `Resources`/`MediaBox`/`CropBox`/
//! `Rotate` copied down from the page tree), and a fresh page tree and
//! catalog are built on top. Page content streams are carried over as-is.
//!
//! The combined file is committed atomically: bytes go to
//! `<output>.tmp` in the same directory and are renamed into place only once
//! every input merged, so a failed merge never leaves a partial download.

use crate::error::PipelineError;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

fn merge_err(detail: impl Into<String>) -> PipelineError {
    PipelineError::Merge {
        detail: detail.into(),
    }
}

/// Merge already-loaded documents, pages in input order.
pub fn merge_documents(docs: Vec<Document>) -> Result<Document, PipelineError> {
    if docs.is_empty() {
        return Err(merge_err("no input documents"));
    }

    let mut merged = Document::with_version("1.5");
    let mut page_ids: Vec<ObjectId> = Vec::new();
    let mut next_id = 1;

    for mut doc in docs {
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        // BTreeMap keyed by page number, so this is page order.
        for (_, page_id) in doc.get_pages() {
            let page = resolve_page(&doc, page_id)?;
            merged.objects.insert(page_id, Object::Dictionary(page));
            page_ids.push(page_id);
        }

        for (id, object) in doc.objects {
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline" => {}
                _ => {
                    merged.objects.insert(id, object);
                }
            }
        }
    }

    if page_ids.is_empty() {
        return Err(merge_err("inputs contain no pages"));
    }

    let pages_id = (next_id, 0);
    let catalog_id = (next_id + 1, 0);

    for id in &page_ids {
        if let Ok(Object::Dictionary(page)) = merged.get_object_mut(*id) {
            page.set("Parent", pages_id);
        }
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );
    merged.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        }),
    );
    merged.trailer.set("Root", catalog_id);
    merged.max_id = next_id + 1;
    merged.renumber_objects();
    merged.compress();

    debug!(pages = page_ids.len(), "Documents merged");
    Ok(merged)
}

/// The page dictionary with inherited attributes made explicit.
fn resolve_page(doc: &Document, page_id: ObjectId) -> Result<Dictionary, PipelineError> {
    let mut page = doc
        .get_dictionary(page_id)
        .map_err(|e| merge_err(format!("page object {page_id:?}: {e}")))?
        .clone();

    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // Page trees are shallow; the bound guards against reference cycles.
    for _ in 0..32 {
        let Some(node_id) = parent else { break };
        let Ok(node) = doc.get_dictionary(node_id) else { break };
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key, value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(page)
}

fn serialize(mut doc: Document) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| merge_err(format!("serialising merged PDF: {e}")))?;
    Ok(buf)
}

/// Merge in-memory PDFs into one PDF.
pub fn merge_bytes(inputs: &[Vec<u8>]) -> Result<Vec<u8>, PipelineError> {
    let docs = inputs
        .iter()
        .enumerate()
        .map(|(idx, bytes)| {
            Document::load_mem(bytes)
                .map_err(|e| merge_err(format!("input {} is not a valid PDF: {e}", idx + 1)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    serialize(merge_documents(docs)?)
}

/// Merge the PDFs at `inputs` (in order) into `output`.
///
/// Returns the page count of the combined document. On error nothing is
/// written at `output`.
pub fn merge_files(inputs: &[PathBuf], output: &Path) -> Result<usize, PipelineError> {
    let docs = inputs
        .iter()
        .map(|path| {
            Document::load(path)
                .map_err(|e| merge_err(format!("cannot read '{}': {e}", path.display())))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let merged = merge_documents(docs)?;
    let page_count = merged.get_pages().len();
    let bytes = serialize(merged)?;
    commit_atomically(output, &bytes)?;

    info!(
        inputs = inputs.len(),
        pages = page_count,
        path = %output.display(),
        "Combined PDF saved"
    );
    Ok(page_count)
}

/// [`merge_files`] on the blocking pool.
pub async fn merge_files_async(
    inputs: Vec<PathBuf>,
    output: PathBuf,
) -> Result<usize, PipelineError> {
    tokio::task::spawn_blocking(move || merge_files(&inputs, &output))
        .await
        .map_err(|e| PipelineError::Internal(format!("Merge task panicked: {}", e)))?
}

fn commit_atomically(output: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let tmp = output.with_extension("pdf.tmp");
    std::fs::write(&tmp, bytes).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        merge_err(format!("writing '{}': {e}", tmp.display()))
    })?;
    std::fs::rename(&tmp, output).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        merge_err(format!("committing '{}': {e}", output.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::page_pdf::{render_text_pdf, PageFont};

    fn page(text: &str) -> Vec<u8> {
        render_text_pdf("t", text, &PageFont::courier("test")).bytes
    }

    #[test]
    fn merges_in_order_with_page_count() {
        let merged = merge_bytes(&[page("one"), page("two"), page("three")]).unwrap();
        let doc = Document::load_mem(&merged).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn multi_page_inputs_keep_their_pages() {
        let long = (0..120).map(|i| format!("l{i}")).collect::<Vec<_>>().join("\n");
        let long_pages = Document::load_mem(&page(&long)).unwrap().get_pages().len();
        let merged = merge_bytes(&[page("a"), page(&long)]).unwrap();
        let doc = Document::load_mem(&merged).unwrap();
        assert_eq!(doc.get_pages().len(), 1 + long_pages);
    }

    #[test]
    fn empty_input_list_is_an_error() {
        assert!(matches!(merge_bytes(&[]), Err(PipelineError::Merge { .. })));
    }

    #[test]
    fn invalid_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        std::fs::write(&good, page("ok")).unwrap();
        std::fs::write(&bad, b"not a pdf").unwrap();
        let out = dir.path().join("combined.pdf");

        let err = merge_files(&[good, bad], &out).unwrap_err();
        assert!(matches!(err, PipelineError::Merge { .. }));
        assert!(!out.exists());
        assert!(!out.with_extension("pdf.tmp").exists());
    }

    #[test]
    fn failed_merge_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("combined.pdf");
        std::fs::write(&out, b"previous").unwrap();

        let missing = dir.path().join("missing.pdf");
        assert!(merge_files(&[missing], &out).is_err());
        assert_eq!(std::fs::read(&out).unwrap(), b"previous");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_leaves_no_tmp_file() {
        if !Path::new("/dev/full").exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("combined_text.pdf");
        let tmp = output.with_extension("pdf.tmp");
        std::os::unix::fs::symlink("/dev/full", &tmp).unwrap();

        let err = commit_atomically(&output, b"%PDF-1.7 partial").unwrap_err();
        assert!(matches!(err, PipelineError::Merge { .. }), "{err}");
        assert!(tmp.symlink_metadata().is_err(), "tmp entry left behind");
        assert!(!output.exists());
    }
}

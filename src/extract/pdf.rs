//! PDF text extraction with fallbacks.
//!
//! Three methods are tried in order and the first one that yields any
//! non-blank page wins:
//!
//! 1. `pdf-extract` — best font-encoding handling, but may panic on
//!    malformed files, so it runs under `catch_unwind`.
//! 2. `lopdf` — rawer text operators, more tolerant of broken structure.
//! 3. OCR — `pdftoppm` renders pages to PNG and `tesseract` reads them.
//!    Only used when `extraction.enable_ocr` is set and both tools are on
//!    `PATH`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use super::ExtractError;
use crate::config::ExtractionConfig;
use crate::models::{DocumentKind, DocumentMetadata, SourceDocument, UploadedFile};

const METHOD_PDF_EXTRACT: &str = "pdf-extract";
const METHOD_LOPDF: &str = "lopdf";
const METHOD_OCR: &str = "ocr";

/// Extract one document per non-blank page.
pub fn extract_pdf(file: &UploadedFile, config: &ExtractionConfig) -> Vec<SourceDocument> {
    let mut docs = match pages_via_pdf_extract(&file.bytes) {
        Ok(pages) => pages_to_documents(&file.name, pages, METHOD_PDF_EXTRACT),
        Err(e) => {
            warn!(file = %file.name, error = %e, "pdf-extract failed");
            Vec::new()
        }
    };

    if docs.is_empty() {
        docs = match pages_via_lopdf(&file.bytes) {
            Ok(pages) => pages_to_documents(&file.name, pages, METHOD_LOPDF),
            Err(e) => {
                warn!(file = %file.name, error = %e, "lopdf failed");
                Vec::new()
            }
        };
    }

    if docs.is_empty() && config.enable_ocr {
        docs = match pages_via_ocr(&file.bytes, config.ocr_dpi) {
            Ok(pages) => pages_to_documents(&file.name, pages, METHOD_OCR),
            Err(e) => {
                warn!(file = %file.name, error = %e, "OCR failed");
                Vec::new()
            }
        };
    }

    if docs.is_empty() {
        return vec![SourceDocument::error(
            &file.name,
            "No text extracted from PDF",
            "no_content",
        )];
    }

    info!(
        file = %file.name,
        pages = docs.len(),
        method = docs[0].metadata.method.as_deref().unwrap_or_default(),
        "PDF text extracted"
    );
    docs
}

/// Turn `(page_number, text)` pairs into documents, dropping blank pages.
fn pages_to_documents(source: &str, pages: Vec<(u32, String)>, method: &str) -> Vec<SourceDocument> {
    pages
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(page, text)| {
            let mut metadata = DocumentMetadata::new(source, DocumentKind::PdfPage);
            metadata.page = Some(page);
            metadata.method = Some(method.to_string());
            metadata.char_count = Some(text.chars().count());
            SourceDocument::new(text, metadata)
        })
        .collect()
}

fn pages_via_pdf_extract(bytes: &[u8]) -> Result<Vec<(u32, String)>, ExtractError> {
    let result = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));

    match result {
        Ok(Ok(pages)) => Ok(number_pages(pages)),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(ExtractError::Pdf(format!("pdf-extract panicked: {}", msg)))
        }
    }
}

fn number_pages(pages: Vec<String>) -> Vec<(u32, String)> {
    pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i as u32 + 1, text))
        .collect()
}

fn pages_via_lopdf(bytes: &[u8]) -> Result<Vec<(u32, String)>, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut pages = Vec::new();
    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(text) => pages.push((*page_number, text)),
            Err(e) => debug!(page = page_number, error = %e, "lopdf could not read page"),
        }
    }
    Ok(pages)
}

/// Render pages with `pdftoppm` and read each image with `tesseract`.
fn pages_via_ocr(bytes: &[u8], dpi: u32) -> Result<Vec<(u32, String)>, ExtractError> {
    let workdir = tempfile::TempDir::new()?;
    let input = workdir.path().join("input.pdf");
    std::fs::write(&input, bytes)?;

    let prefix = workdir.path().join("page");
    let output = Command::new("pdftoppm")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-png")
        .arg(&input)
        .arg(&prefix)
        .output()
        .map_err(|e| ExtractError::Ocr(format!("failed to run pdftoppm (is poppler installed?): {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractError::Ocr(format!("pdftoppm failed: {}", stderr.trim())));
    }

    let mut pages = Vec::new();
    for (page, image) in rendered_pages(workdir.path())? {
        let output = Command::new("tesseract")
            .arg(&image)
            .arg("stdout")
            .output()
            .map_err(|e| {
                ExtractError::Ocr(format!("failed to run tesseract (is it installed?): {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(page, error = %stderr.trim(), "tesseract failed on page");
            continue;
        }
        pages.push((page, String::from_utf8_lossy(&output.stdout).into_owned()));
    }

    Ok(pages)
}

/// List `page-<n>.png` files in page order. `pdftoppm` zero-pads the number
/// depending on the page count, so the suffix is parsed, not compared.
fn rendered_pages(dir: &Path) -> Result<Vec<(u32, PathBuf)>, ExtractError> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(page) = page_number_from_image(&path) {
            images.push((page, path));
        }
    }
    images.sort_by_key(|(page, _)| *page);
    Ok(images)
}

fn page_number_from_image(path: &Path) -> Option<u32> {
    if path.extension().and_then(|e| e.to_str()) != Some("png") {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix("page-")?
        .parse()
        .ok()
}

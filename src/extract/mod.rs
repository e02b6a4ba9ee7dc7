//! Text extraction for uploaded documents.
//!
//! Routes a file to the PDF or spreadsheet extractor by its extension and
//! returns a list of [`SourceDocument`]s. Extraction never fails outright:
//! when a PDF or spreadsheet cannot be read, the result is a single
//! [`DocumentKind::Error`] document describing the cause, so the caller can
//! show it and decide what to do.
//!
//! All extractors are blocking (library parsing, OCR subprocesses). Async
//! callers should go through [`extract_file_blocking`].

pub mod pdf;
pub mod tabular;

use std::collections::BTreeMap;

use crate::config::ExtractionConfig;
use crate::models::{DocumentKind, DocumentMetadata, FileKind, SourceDocument, UploadedFile};

/// Extraction failure inside one method. Surfaced to users only through
/// error documents and logs.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
    #[error("CSV extraction failed: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Extract every document from an uploaded file.
pub fn extract_file(file: &UploadedFile, config: &ExtractionConfig) -> Vec<SourceDocument> {
    let docs = match file.kind {
        FileKind::Pdf => pdf::extract_pdf(file, config),
        FileKind::Excel | FileKind::Csv => tabular::extract_tabular(file, config),
        FileKind::Text => vec![plain_text(file, DocumentKind::Text)],
        FileKind::Unknown => vec![plain_text(file, DocumentKind::Unknown)],
    };

    tracing::info!(
        file = %file.name,
        kind = ?file.kind,
        documents = docs.len(),
        "extraction completed"
    );
    docs
}

/// Runs [`extract_file`] on the blocking thread pool.
pub async fn extract_file_blocking(
    file: UploadedFile,
    config: ExtractionConfig,
) -> anyhow::Result<(UploadedFile, Vec<SourceDocument>)> {
    let result = tokio::task::spawn_blocking(move || {
        let docs = extract_file(&file, &config);
        (file, docs)
    })
    .await?;
    Ok(result)
}

fn plain_text(file: &UploadedFile, kind: DocumentKind) -> SourceDocument {
    let text = String::from_utf8_lossy(&file.bytes).into_owned();
    SourceDocument::new(text, DocumentMetadata::new(&file.name, kind))
}

/// Count documents per kind, for the extraction summary.
pub fn count_by_kind(docs: &[SourceDocument]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for doc in docs {
        *counts.entry(doc.metadata.kind.to_string()).or_insert(0) += 1;
    }
    counts
}

/// True when every document is an error placeholder or has no content.
pub fn is_effectively_empty(docs: &[SourceDocument]) -> bool {
    docs.iter()
        .all(|d| d.metadata.kind == DocumentKind::Error || d.content.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_file_becomes_single_document() {
        let file = UploadedFile::new("notes.txt", b"Revenue grew 4%".to_vec());
        let docs = extract_file(&file, &ExtractionConfig::default());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "Revenue grew 4%");
        assert_eq!(docs[0].metadata.kind, DocumentKind::Text);
        assert_eq!(docs[0].metadata.source, "notes.txt");
    }

    #[test]
    fn unknown_extension_is_read_as_lossy_text() {
        let file = UploadedFile::new("dump.log", vec![b'o', b'k', 0xff]);
        let docs = extract_file(&file, &ExtractionConfig::default());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata.kind, DocumentKind::Unknown);
        assert!(docs[0].content.starts_with("ok"));
    }

    #[test]
    fn counts_by_kind() {
        let docs = vec![
            SourceDocument::new("a", DocumentMetadata::new("f", DocumentKind::CsvComplete)),
            SourceDocument::new("b", DocumentMetadata::new("f", DocumentKind::CsvGroup)),
            SourceDocument::new("c", DocumentMetadata::new("f", DocumentKind::CsvGroup)),
        ];
        let counts = count_by_kind(&docs);
        assert_eq!(counts["csv_group"], 2);
        assert_eq!(counts["csv_complete"], 1);
    }

    #[test]
    fn error_documents_count_as_empty() {
        let docs = vec![SourceDocument::error("x.pdf", "No text extracted from PDF", "no_content")];
        assert!(is_effectively_empty(&docs));
        assert!(is_effectively_empty(&[]));
    }
}

//! Core data types.
//!
//! These types represent the uploaded files, extracted documents, chunks, and
//! retrieval results that flow through the ingestion and question-answering
//! pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// File type, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Pdf,
    Excel,
    Csv,
    Text,
    Unknown,
}

impl FileKind {
    pub fn from_name(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => FileKind::Excel,
            "csv" => FileKind::Csv,
            "txt" => FileKind::Text,
            _ => FileKind::Unknown,
        }
    }
}

/// A file handed to the extractor, by upload or from disk.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub kind: FileKind,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let kind = FileKind::from_name(&name);
        Self { name, bytes, kind }
    }

    /// SHA-256 of the raw bytes; identifies re-uploads of the same file.
    pub fn content_hash(&self) -> String {
        hash_bytes(&self.bytes)
    }
}

/// What an extracted document represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PdfPage,
    CsvComplete,
    CsvGroup,
    FinancialSummary,
    ExcelSheetComplete,
    ExcelChunk,
    Text,
    Unknown,
    Error,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PdfPage => "pdf_page",
            DocumentKind::CsvComplete => "csv_complete",
            DocumentKind::CsvGroup => "csv_group",
            DocumentKind::FinancialSummary => "financial_summary",
            DocumentKind::ExcelSheetComplete => "excel_sheet_complete",
            DocumentKind::ExcelChunk => "excel_chunk",
            DocumentKind::Text => "text",
            DocumentKind::Unknown => "unknown",
            DocumentKind::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pdf_page" => DocumentKind::PdfPage,
            "csv_complete" => DocumentKind::CsvComplete,
            "csv_group" => DocumentKind::CsvGroup,
            "financial_summary" => DocumentKind::FinancialSummary,
            "excel_sheet_complete" => DocumentKind::ExcelSheetComplete,
            "excel_chunk" => DocumentKind::ExcelChunk,
            "text" => DocumentKind::Text,
            "unknown" => DocumentKind::Unknown,
            "error" => DocumentKind::Error,
            _ => return None,
        })
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance attached to every extracted document and inherited by its chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub kind: DocumentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentMetadata {
    pub fn new(source: impl Into<String>, kind: DocumentKind) -> Self {
        Self {
            source: source.into(),
            kind,
            page: None,
            method: None,
            char_count: None,
            sheet: None,
            rows: None,
            columns: None,
            group_column: None,
            group_value: None,
            chunk_start: None,
            chunk_end: None,
            error: None,
        }
    }
}

/// One unit of extracted content: a PDF page, a sheet rendering, a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl SourceDocument {
    pub fn new(content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// Placeholder document describing why extraction produced nothing useful.
    pub fn error(source: &str, content: impl Into<String>, cause: impl Into<String>) -> Self {
        let mut metadata = DocumentMetadata::new(source, DocumentKind::Error);
        metadata.error = Some(cause.into());
        Self::new(content, metadata)
    }
}

/// Coarse retrieval hint derived from a chunk's wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece of a document's text, ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`; stored next to the embedding.
    pub hash: String,
    pub priority: Priority,
    pub metadata: DocumentMetadata,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One turn of the chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_by_extension() {
        assert_eq!(FileKind::from_name("Report.PDF"), FileKind::Pdf);
        assert_eq!(FileKind::from_name("q1.xlsx"), FileKind::Excel);
        assert_eq!(FileKind::from_name("old.xls"), FileKind::Excel);
        assert_eq!(FileKind::from_name("ledger.csv"), FileKind::Csv);
        assert_eq!(FileKind::from_name("notes.txt"), FileKind::Text);
        assert_eq!(FileKind::from_name("data.json"), FileKind::Unknown);
        assert_eq!(FileKind::from_name("README"), FileKind::Unknown);
    }

    #[test]
    fn content_hash_is_stable() {
        let a = UploadedFile::new("a.csv", b"x,y\n1,2\n".to_vec());
        let b = UploadedFile::new("b.csv", b"x,y\n1,2\n".to_vec());
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn kind_strings_parse_back() {
        for kind in [
            DocumentKind::PdfPage,
            DocumentKind::CsvGroup,
            DocumentKind::ExcelChunk,
            DocumentKind::Error,
        ] {
            assert_eq!(DocumentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(Priority::parse("critical"), Some(Priority::Critical));
        assert_eq!(Priority::parse("urgent"), None);
    }
}

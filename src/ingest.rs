//! File ingestion commands.
//!
//! `docqa ingest <FILE>` runs the same flow as an upload through the web UI:
//! extraction → chunking → embedding → storage, replacing the configured
//! collection. `docqa extract <FILE>` stops after extraction and prints the
//! documents, which is handy for checking what a spreadsheet turns into.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::extract::{count_by_kind, extract_file_blocking, is_effectively_empty};
use crate::models::{DocumentKind, SourceDocument, UploadedFile};
use crate::pipeline::QaPipeline;

/// Read a file from disk, enforcing `extraction.max_upload_bytes`.
fn read_upload(config: &Config, path: &Path) -> Result<UploadedFile> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let limit = config.extraction.max_upload_bytes;
    if bytes.len() > limit {
        bail!(
            "{} is {} bytes; the upload limit is {} bytes",
            path.display(),
            bytes.len(),
            limit
        );
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(UploadedFile::new(name, bytes))
}

async fn extract(config: &Config, path: &Path) -> Result<(UploadedFile, Vec<SourceDocument>)> {
    let file = read_upload(config, path)?;
    extract_file_blocking(file, config.extraction.clone()).await
}

pub async fn run_ingest(config: &Config, path: &Path) -> Result<()> {
    let (file, docs) = extract(config, path).await?;

    if is_effectively_empty(&docs) {
        let reason = docs
            .iter()
            .find(|d| d.metadata.kind == DocumentKind::Error)
            .map(|d| d.content.clone())
            .unwrap_or_else(|| "No data extracted from the file".to_string());
        bail!("{}", reason);
    }

    let pipeline = QaPipeline::from_config(config).await?;
    let report = pipeline.create_index(&docs).await?;

    println!("ingest {}", file.name);
    println!("  sha256: {}", file.content_hash());
    println!("  documents: {}", report.documents);
    for (kind, n) in &report.by_kind {
        println!("    {:<22} {}", kind, n);
    }
    println!("  chunks written: {}", report.chunks);
    println!("  collection: {}", pipeline.collection());
    println!("ok");
    Ok(())
}

pub async fn run_extract(config: &Config, path: &Path) -> Result<()> {
    let (file, docs) = extract(config, path).await?;

    println!("extract {}", file.name);
    println!("  documents: {}", docs.len());
    for (kind, n) in count_by_kind(&docs) {
        println!("    {:<22} {}", kind, n);
    }
    println!();

    for (i, doc) in docs.iter().enumerate() {
        println!("--- Document {} [{}]{} ---", i + 1, doc.metadata.kind, locator(doc));
        if let Some(err) = &doc.metadata.error {
            println!("error: {}", err);
        }
        println!("{}", doc.content);
        println!();
    }
    Ok(())
}

/// Where in the file a document came from, e.g. ` page 3` or ` sheet Q1`.
fn locator(doc: &SourceDocument) -> String {
    let m = &doc.metadata;
    let mut out = String::new();
    if let Some(page) = m.page {
        out.push_str(&format!(" page {}", page));
    }
    if let Some(sheet) = &m.sheet {
        out.push_str(&format!(" sheet {}", sheet));
    }
    if let (Some(col), Some(val)) = (&m.group_column, &m.group_value) {
        out.push_str(&format!(" {}={}", col, val));
    }
    if let (Some(start), Some(end)) = (m.chunk_start, m.chunk_end) {
        out.push_str(&format!(" rows {}-{}", start, end));
    }
    out
}

pub async fn run_clear(config: &Config) -> Result<()> {
    let pipeline = QaPipeline::from_config(config).await?;
    pipeline.clear().await?;
    println!("cleared collection '{}'", pipeline.collection());
    Ok(())
}

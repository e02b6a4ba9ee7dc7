//! Vector store statistics.
//!
//! Summarises what the configured collection holds: chunk counts, embedding
//! coverage, and breakdowns by document kind and priority. Used by
//! `docqa stats` to confirm an ingest did what was expected.

use anyhow::Result;

use crate::config::Config;
use crate::store::{SqliteStore, VectorStore};

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.db).await?;
    let stats = store.stats(&config.db.collection).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docqa — Vector Store Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Collection:  {}", stats.collection);
    println!();
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.embedded * 100) / stats.chunks
        } else {
            0
        }
    );
    if let Some(model) = &stats.model {
        println!("  Model:       {}", model);
    }
    if !stats.sources.is_empty() {
        println!("  Sources:     {}", stats.sources.join(", "));
    }

    if !stats.by_kind.is_empty() {
        println!();
        println!("  By kind:");
        println!("  {:<24} {:>8}", "KIND", "CHUNKS");
        println!("  {}", "-".repeat(33));
        for (kind, n) in &stats.by_kind {
            println!("  {:<24} {:>8}", kind, n);
        }
    }

    if !stats.by_priority.is_empty() {
        println!();
        println!("  By priority:");
        for (priority, n) in &stats.by_priority {
            println!("  {:<24} {:>8}", priority, n);
        }
    }

    println!();

    store.pool().close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_byte_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}

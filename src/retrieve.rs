//! `docqa retrieve`: show what a question pulls out of the vector store.
//!
//! Runs a single similarity search for the question as typed (no query
//! generation) and prints each hit with its score, priority and provenance.
//! Use it to see why an answer missed a total or picked the wrong rows.

use anyhow::Result;

use crate::config::Config;
use crate::pipeline::QaPipeline;

/// Characters of chunk text shown per result.
const PREVIEW_CHARS: usize = 240;

pub async fn run_retrieve(config: &Config, question: &str, k: Option<usize>) -> Result<()> {
    if question.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pipeline = QaPipeline::from_config(config).await?;
    let k = k.unwrap_or(config.retrieval.k).max(1);
    let hits = pipeline.debug_retrieval(question, k).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let chunk = &hit.chunk;
        println!(
            "{}. [{:.4}] {} / {}",
            i + 1,
            hit.score,
            chunk.priority,
            chunk.metadata.kind
        );
        println!("    source: {}", chunk.metadata.source);
        println!("    chunk: {}", chunk.chunk_index);
        println!("    text: {}", preview(&chunk.text));
        println!();
    }
    Ok(())
}

/// First [`PREVIEW_CHARS`] characters on one line.
fn preview(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .take(PREVIEW_CHARS)
        .collect();
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", flat)
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\nb"), "a b");
        let long = "x".repeat(PREVIEW_CHARS + 10);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
    }
}

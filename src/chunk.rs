//! Recursive character text splitter.
//!
//! Splits extracted document text into [`Chunk`]s of at most `chunk_size`
//! characters, with up to `chunk_overlap` characters repeated between
//! neighbouring chunks. Splitting tries the coarsest separator first
//! (blank lines), then falls back to finer ones, down to single characters.
//! The separator list includes the section markers that the tabular
//! extractor writes (`===`, `TOTAL`, `SUMMARY`, ...) so summaries tend to
//! stay in one piece.
//!
//! Each chunk receives a random UUID, a SHA-256 hash of its text, and a
//! [`Priority`] derived from keywords in the text.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{hash_bytes, Chunk, Priority, SourceDocument};

/// Tried in order. The empty string means "split into characters".
pub const SEPARATORS: &[&str] = &[
    "\n\n", "\n", "===", "TOTAL", "SUMMARY", "BREAKDOWN", "---", "|", ",", " ", "",
];

const CRITICAL_MARKERS: &[&str] = &[
    "total records:",
    "total amount:",
    "financial summary",
    "total:",
    "sum:",
    "breakdown",
];
const HIGH_MARKERS: &[&str] = &["calculation:", "average:", "count:", "distribution"];
const MEDIUM_MARKERS: &[&str] = &["record", "row", "data"];

/// Split every document and return chunks with contiguous indices across
/// the whole batch.
pub fn split_documents(docs: &[SourceDocument], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for doc in docs {
        for text in split_text(&doc.content, config.chunk_size, config.chunk_overlap) {
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                chunk_index: index,
                hash: hash_bytes(text.as_bytes()),
                priority: classify_priority(&text),
                text,
                metadata: doc.metadata.clone(),
            });
            index += 1;
        }
    }

    chunks
}

/// Label a chunk by the strongest keyword it contains.
pub fn classify_priority(text: &str) -> Priority {
    let lower = text.to_lowercase();
    let has_any = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if has_any(CRITICAL_MARKERS) {
        Priority::Critical
    } else if has_any(HIGH_MARKERS) {
        Priority::High
    } else if has_any(MEDIUM_MARKERS) {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Split `text` into trimmed, non-blank pieces of at most `chunk_size`
/// characters.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let splitter = Splitter {
        chunk_size: chunk_size.max(1),
        chunk_overlap,
    };
    splitter.split(text, SEPARATORS)
}

struct Splitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Splitter {
    fn split(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // First separator present in the text; "" always matches.
        let position = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let mut out = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                out.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            } else {
                out.extend(self.split(piece, finer));
            }
        }

        if !pending.is_empty() {
            out.extend(self.merge(&pending));
        }
        out
    }

    /// Greedily concatenate small pieces into chunks, carrying trailing
    /// pieces worth at most `chunk_overlap` characters into the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut out, &window);
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }

        push_joined(&mut out, &window);
        out
    }
}

fn push_joined(out: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Split before every occurrence of `separator`, so each piece after the
/// first starts with it. An empty separator splits into characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(&text[start..pos]);
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, DocumentMetadata};

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("Revenue: 100", 1500, 300);
        assert_eq!(chunks, vec!["Revenue: 100"]);
    }

    #[test]
    fn blank_text_yields_nothing() {
        assert!(split_text("", 100, 10).is_empty());
        assert!(split_text(" \n\n \n", 100, 10).is_empty());
    }

    #[test]
    fn separators_stay_with_following_piece() {
        assert_eq!(
            split_keeping_separator("a|b|c", "|"),
            vec!["a", "|b", "|c"]
        );
        assert_eq!(split_keeping_separator("|a", "|"), vec!["|a"]);
        assert_eq!(split_keeping_separator("né", ""), vec!["n", "é"]);
    }

    #[test]
    fn chunks_respect_size_limit() {
        let text = (0..200)
            .map(|i| format!("Row {}: Category:Rent | Amount:{}", i, i * 10))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_text(&text, 300, 60);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 300, "chunk too long: {}", c.len());
        }
    }

    #[test]
    fn neighbouring_chunks_overlap() {
        let text = (0..40)
            .map(|i| format!("line {:02}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_text(&text, 80, 30);
        assert!(chunks.len() > 1);
        let last_line_of_first = chunks[0].lines().last().unwrap();
        assert!(chunks[1].contains(last_line_of_first));
    }

    #[test]
    fn multibyte_text_never_splits_inside_a_character() {
        let text = "€".repeat(50);
        let chunks = split_text(&text, 7, 2);
        for c in &chunks {
            assert!(c.chars().all(|ch| ch == '€'));
            assert!(c.chars().count() <= 7);
        }
    }

    #[test]
    fn priority_rules() {
        assert_eq!(classify_priority("TOTAL AMOUNT: $5,000"), Priority::Critical);
        assert_eq!(
            classify_priority("=== FINANCIAL SUMMARY ===\nAmount TOTAL: 10"),
            Priority::Critical
        );
        assert_eq!(classify_priority("Amount AVERAGE: 3.00"), Priority::High);
        assert_eq!(classify_priority("Row 4: Category:Rent"), Priority::Medium);
        assert_eq!(classify_priority("Quarterly outlook"), Priority::Low);
    }

    #[test]
    fn indices_are_contiguous_across_documents() {
        let docs = vec![
            SourceDocument::new(
                "first page\n\nsecond paragraph",
                DocumentMetadata::new("a.pdf", DocumentKind::PdfPage),
            ),
            SourceDocument::new(
                "Amount TOTAL: 10",
                DocumentMetadata::new("a.csv", DocumentKind::FinancialSummary),
            ),
        ];
        let config = ChunkingConfig {
            chunk_size: 12,
            chunk_overlap: 0,
        };
        let chunks = split_documents(&docs, &config);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.hash, hash_bytes(c.text.as_bytes()));
        }
        let last = chunks.last().unwrap();
        assert_eq!(last.metadata.kind, DocumentKind::FinancialSummary);
    }
}

//! Vector storage.
//!
//! The [`VectorStore`] trait is everything the question-answering pipeline
//! needs from a vector database: replace a collection's contents
//! atomically, add embedded chunks, and run a top-k cosine similarity
//! search. Backends:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`] | Persistent store; vectors as BLOBs, brute-force search |
//! | [`InMemoryStore`] | Tests and throwaway sessions |
//!
//! Search results are ordered by descending score; equal scores are
//! ordered by ascending `chunk_index` so results are deterministic.

pub mod memory;
pub mod sqlite;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Chunk, RetrievedChunk};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Summary of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub collection: String,
    pub chunks: usize,
    pub embedded: usize,
    /// Chunk count per document kind (`csv_group`, `pdf_page`, ...).
    pub by_kind: BTreeMap<String, usize>,
    /// Chunk count per priority label.
    pub by_priority: BTreeMap<String, usize>,
    /// Distinct source file names.
    pub sources: Vec<String>,
    /// Embedding model of the stored vectors, if any.
    pub model: Option<String>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Delete every chunk and vector in `collection`.
    async fn reset(&self, collection: &str) -> Result<()>;

    /// Insert or replace chunks with their vectors. `vectors[i]` belongs to
    /// `chunks[i]`; the slices must be the same length.
    async fn add(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()>;

    /// Swap the whole contents of `collection` for `chunks`. Readers see
    /// either the old contents or the new ones; on error the old contents
    /// are kept.
    async fn replace(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()>;

    /// Top `k` chunks by cosine similarity to `query_vec`.
    async fn similarity_search(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Number of chunks in `collection`.
    async fn count(&self, collection: &str) -> Result<usize>;

    async fn stats(&self, collection: &str) -> Result<StoreStats>;
}

/// Sort by score descending, then chunk index ascending, and keep `k`.
pub(crate) fn rank(mut hits: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
    hits.truncate(k);
    hits
}

pub(crate) fn check_lengths(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        anyhow::bail!(
            "chunk/vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        );
    }
    Ok(())
}

//! In-memory [`VectorStore`] for tests and throwaway sessions.
//!
//! Chunks and vectors live in a `Vec` per collection behind a
//! `tokio::sync::RwLock`. Search is brute-force cosine similarity.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{check_lengths, rank, StoreStats, VectorStore};
use crate::embedding::cosine_similarity;
use crate::models::{Chunk, RetrievedChunk};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    model: String,
}

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<StoredChunk>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn reset(&self, collection: &str) -> Result<()> {
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn add(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        check_lengths(chunks, vectors)?;
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();
        for (chunk, vector) in chunks.iter().zip(vectors) {
            stored.retain(|s| s.chunk.id != chunk.id);
            stored.push(StoredChunk {
                chunk: chunk.clone(),
                vector: vector.clone(),
                model: model.to_string(),
            });
        }
        Ok(())
    }

    async fn replace(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        check_lengths(chunks, vectors)?;
        let mut stored: Vec<StoredChunk> = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            stored.retain(|s| s.chunk.id != chunk.id);
            stored.push(StoredChunk {
                chunk: chunk.clone(),
                vector: vector.clone(),
                model: model.to_string(),
            });
        }
        self.collections
            .write()
            .await
            .insert(collection.to_string(), stored);
        Ok(())
    }

    async fn similarity_search(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let collections = self.collections.read().await;
        let hits = collections
            .get(collection)
            .map(|stored| {
                stored
                    .iter()
                    .map(|s| RetrievedChunk {
                        chunk: s.chunk.clone(),
                        score: cosine_similarity(query_vec, &s.vector),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rank(hits, k))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len))
    }

    async fn stats(&self, collection: &str) -> Result<StoreStats> {
        let collections = self.collections.read().await;
        let mut stats = StoreStats {
            collection: collection.to_string(),
            ..StoreStats::default()
        };
        let Some(stored) = collections.get(collection) else {
            return Ok(stats);
        };

        let mut by_kind = BTreeMap::new();
        let mut by_priority = BTreeMap::new();
        let mut sources = BTreeSet::new();
        for s in stored {
            *by_kind.entry(s.chunk.metadata.kind.to_string()).or_insert(0) += 1;
            *by_priority.entry(s.chunk.priority.to_string()).or_insert(0) += 1;
            sources.insert(s.chunk.metadata.source.clone());
        }

        stats.chunks = stored.len();
        stats.embedded = stored.iter().filter(|s| !s.vector.is_empty()).count();
        stats.by_kind = by_kind;
        stats.by_priority = by_priority;
        stats.sources = sources.into_iter().collect();
        stats.model = stored.first().map(|s| s.model.clone());
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::super::conformance;
    use super::*;

    #[tokio::test]
    async fn search_order() {
        conformance::search_orders_by_score_then_index(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn isolation_and_reset() {
        conformance::collections_are_isolated_and_resettable(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn stats() {
        conformance::stats_count_kinds_and_priorities(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn length_mismatch() {
        conformance::mismatched_lengths_rejected(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn replace() {
        conformance::replace_swaps_contents(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn failed_replace() {
        conformance::failed_replace_keeps_old_contents(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn missing_collection_is_empty() {
        let store = InMemoryStore::new();
        assert_eq!(store.count("nope").await.unwrap(), 0);
        assert_eq!(store.stats("nope").await.unwrap().chunks, 0);
    }
}

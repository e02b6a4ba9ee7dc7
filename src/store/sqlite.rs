//! SQLite-backed [`VectorStore`].
//!
//! Chunks go in `chunks`, vectors in `chunk_vectors` as little-endian f32
//! BLOBs. Similarity search loads a collection's vectors and scores them
//! in process; there is no ANN index.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{check_lengths, rank, StoreStats, VectorStore};
use crate::config::DbConfig;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, DocumentMetadata, Priority, RetrievedChunk};
use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let id: String = row.get("id");
    let metadata_json: String = row.get("metadata_json");
    let metadata = serde_json::from_str::<DocumentMetadata>(&metadata_json)
        .with_context(|| format!("Corrupt metadata for chunk {}", id))?;
    let priority: String = row.get("priority");

    Ok(Chunk {
        id,
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        hash: row.get("hash"),
        priority: Priority::parse(&priority).unwrap_or(Priority::Low),
        metadata,
    })
}

async fn delete_collection(conn: &mut SqliteConnection, collection: &str) -> Result<()> {
    sqlx::query("DELETE FROM chunk_vectors WHERE collection = ?")
        .bind(collection)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE collection = ?")
        .bind(collection)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn upsert_chunks(
    conn: &mut SqliteConnection,
    collection: &str,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    model: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    for (chunk, vector) in chunks.iter().zip(vectors) {
        let metadata_json = serde_json::to_string(&chunk.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO chunks (id, collection, chunk_index, text, hash, priority,
                                kind, source, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                collection = excluded.collection,
                chunk_index = excluded.chunk_index,
                text = excluded.text,
                hash = excluded.hash,
                priority = excluded.priority,
                kind = excluded.kind,
                source = excluded.source,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&chunk.id)
        .bind(collection)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(chunk.priority.as_str())
        .bind(chunk.metadata.kind.as_str())
        .bind(&chunk.metadata.source)
        .bind(&metadata_json)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, collection, model, dims, hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                collection = excluded.collection,
                model = excluded.model,
                dims = excluded.dims,
                hash = excluded.hash,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(collection)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(&chunk.hash)
        .bind(vec_to_blob(vector))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn reset(&self, collection: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_collection(&mut tx, collection).await?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        upsert_chunks(&mut tx, collection, chunks, vectors, model).await?;
        tx.commit().await.context("Failed to commit chunks")?;
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
        let mut tx = self.pool.begin().await?;
        delete_collection(&mut tx, collection).await?;
        upsert_chunks(&mut tx, collection, chunks, vectors, model).await?;
        tx.commit().await.context("Failed to commit collection")?;
        Ok(())
    }

    async fn similarity_search(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.chunk_index, c.text, c.hash, c.priority, c.kind, c.source,
                   c.metadata_json, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.collection = ?
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            hits.push(RetrievedChunk {
                chunk: row_to_chunk(row)?,
                score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
            });
        }
        Ok(rank(hits, k))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn stats(&self, collection: &str) -> Result<StoreStats> {
        let chunks = self.count(collection).await?;
        let embedded: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE collection = ?")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;

        let by_kind = grouped_counts(&self.pool, "kind", collection).await?;
        let by_priority = grouped_counts(&self.pool, "priority", collection).await?;

        let sources: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT source FROM chunks WHERE collection = ? ORDER BY source",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let model: Option<String> =
            sqlx::query_scalar("SELECT model FROM chunk_vectors WHERE collection = ? LIMIT 1")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;

        Ok(StoreStats {
            collection: collection.to_string(),
            chunks,
            embedded: embedded as usize,
            by_kind,
            by_priority,
            sources,
            model,
        })
    }
}

/// `column` is one of our own column names, never user input.
async fn grouped_counts(
    pool: &SqlitePool,
    column: &str,
    collection: &str,
) -> Result<BTreeMap<String, usize>> {
    let sql = format!(
        "SELECT {col} AS label, COUNT(*) AS n FROM chunks WHERE collection = ? GROUP BY {col}",
        col = column
    );
    let rows = sqlx::query(&sql).bind(collection).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let label: String = row.get("label");
            let n: i64 = row.get("n");
            (label, n as usize)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::super::conformance;
    use super::*;
    use crate::models::DocumentKind;

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DbConfig {
            path: dir.path().join("docqa.sqlite"),
            ..DbConfig::default()
        };
        let store = SqliteStore::open(&config).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn search_order() {
        let (_dir, store) = temp_store().await;
        conformance::search_orders_by_score_then_index(&store).await;
    }

    #[tokio::test]
    async fn isolation_and_reset() {
        let (_dir, store) = temp_store().await;
        conformance::collections_are_isolated_and_resettable(&store).await;
    }

    #[tokio::test]
    async fn stats() {
        let (_dir, store) = temp_store().await;
        conformance::stats_count_kinds_and_priorities(&store).await;
    }

    #[tokio::test]
    async fn length_mismatch() {
        let (_dir, store) = temp_store().await;
        conformance::mismatched_lengths_rejected(&store).await;
    }

    #[tokio::test]
    async fn replace() {
        let (_dir, store) = temp_store().await;
        conformance::replace_swaps_contents(&store).await;
    }

    #[tokio::test]
    async fn failed_replace() {
        let (_dir, store) = temp_store().await;
        conformance::failed_replace_keeps_old_contents(&store).await;
    }

    #[tokio::test]
    async fn insert_failure_rolls_back_replace() {
        let (_dir, store) = temp_store().await;
        let old = conformance::chunk(0, "Rent 100", DocumentKind::CsvComplete, Priority::Medium);
        store.add("c", &[old], &[vec![1.0, 0.0]], "m").await.unwrap();

        sqlx::query(
            "CREATE TRIGGER fail_insert BEFORE INSERT ON chunks WHEN NEW.text = 'explode' \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let mut first = conformance::chunk(1, "Travel 50", DocumentKind::CsvComplete, Priority::Medium);
        first.id = "new-1".into();
        let mut second = conformance::chunk(2, "explode", DocumentKind::CsvComplete, Priority::Medium);
        second.id = "new-2".into();
        let err = store
            .replace("c", &[first, second], &[vec![1.0, 0.0], vec![0.0, 1.0]], "m")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));

        let hits = store.similarity_search("c", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "Rent 100");
    }

    #[tokio::test]
    async fn corrupt_metadata_is_reported() {
        let (_dir, store) = temp_store().await;
        let chunk = conformance::chunk(0, "Rent 100", DocumentKind::CsvComplete, Priority::Medium);
        store.add("c", &[chunk], &[vec![1.0, 0.0]], "m").await.unwrap();
        sqlx::query("UPDATE chunks SET metadata_json = '{not json'")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.similarity_search("c", &[1.0, 0.0], 1).await.unwrap_err();
        assert!(err.to_string().contains("Corrupt metadata for chunk chunk-0"));
    }

    #[tokio::test]
    async fn metadata_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DbConfig {
            path: dir.path().join("docqa.sqlite"),
            ..DbConfig::default()
        };
        let mut chunk = conformance::chunk(0, "Sheet Q1", DocumentKind::ExcelChunk, Priority::Medium);
        chunk.metadata.sheet = Some("Q1".into());
        chunk.metadata.chunk_start = Some(201);

        {
            let store = SqliteStore::open(&config).await.unwrap();
            store.add("c", &[chunk.clone()], &[vec![0.5, 0.5]], "m").await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteStore::open(&config).await.unwrap();
        let hits = store.similarity_search("c", &[0.5, 0.5], 1).await.unwrap();
        assert_eq!(hits[0].chunk, chunk);
    }
}

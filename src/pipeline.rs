//! Index building and question answering.
//!
//! # Indexing
//!
//! ```text
//! documents → split_documents → embed_batched → replace(collection)
//! ```
//!
//! The collection is replaced wholesale in one store transaction: one
//! upload, one collection. Index builds and clears are serialised.
//!
//! # Answering
//!
//! ```text
//! question ──► query generation (optional) ──► [original, q1, q2, q3]
//!                                                   │ embed + top-k each
//!                                                   ▼
//!                             union by chunk id, first-seen order
//!                                                   │
//!                                                   ▼
//!                         context (bounded) + question → analyst prompt → model
//! ```
//!
//! Spreadsheets expand into many chunks, so `k` defaults to 100 and the
//! union of several phrasings is used to pull in totals, rows and
//! breakdowns together.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chunk::split_documents;
use crate::config::{ChunkingConfig, Config, RetrievalConfig};
use crate::embedding::{create_embedder, embed_batched, embed_query, Embedder};
use crate::extract::count_by_kind;
use crate::llm::{ChatModel, LlmResult, OllamaClient};
use crate::models::{DocumentKind, RetrievedChunk, SourceDocument};
use crate::store::{SqliteStore, StoreStats, VectorStore};

/// Returned by [`QaPipeline::answer`] when nothing has been indexed.
pub const NO_DOCUMENT_MESSAGE: &str = "Please upload and process a financial document first.";

const QUERY_PROMPT: &str = "\
You are a financial analyst generating search queries for document retrieval.
Create 3 different search queries to find comprehensive information.

Original question: {question}

Generate these specific queries:
1. Query for summary and totals
2. Query for detailed data records
3. Query for calculations and breakdowns

Query 1:
Query 2:
Query 3:";

const ANSWER_PROMPT: &str = "\
You are a professional financial data analyst with access to financial documents.

CONTEXT:
{context}

QUESTION: {question}

CRITICAL ANALYSIS RULES:
1. Use ONLY the data explicitly provided in the context above
2. When you see \"TOTAL RECORDS: X\" - that's the exact count
3. When you see \"TOTAL AMOUNT: $X\" - use that exact figure
4. Sum individual amounts from records if no total is provided
5. Count actual data records, NOT document chunks
6. Use exact percentages and breakdowns as shown
7. Never invent or assume data not in the context
8. If information is missing, clearly state what's unavailable
9. Reference specific context sections in your answer
10. Format financial amounts with proper precision ($X,XXX.XX)

FINANCIAL ANALYSIS:";

/// Generated alternatives kept per question.
const MAX_GENERATED_QUERIES: usize = 3;

/// Outcome of [`QaPipeline::create_index`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    pub by_kind: BTreeMap<String, usize>,
}

pub struct QaPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    collection: String,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    batch_size: usize,
    writer: Mutex<()>,
}

impl QaPipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            embedder,
            chat,
            collection: config.db.collection.clone(),
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            batch_size: config.embedding.batch_size,
            writer: Mutex::new(()),
        }
    }

    /// Pipeline over the SQLite store and the configured model server.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.db).await?);
        let embedder = create_embedder(&config.embedding)?;
        let chat = Arc::new(OllamaClient::new(&config.llm)?);
        Ok(Self::new(config, store, embedder, chat))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Chunk, embed and store `docs`, replacing the collection's contents.
    pub async fn create_index(&self, docs: &[SourceDocument]) -> Result<IndexReport> {
        let usable: Vec<SourceDocument> = docs
            .iter()
            .filter(|d| d.metadata.kind != DocumentKind::Error && !d.content.trim().is_empty())
            .cloned()
            .collect();
        if usable.is_empty() {
            bail!("No data extracted from the file");
        }

        let _writer = self.writer.lock().await;
        let chunks = split_documents(&usable, &self.chunking);
        if chunks.is_empty() {
            bail!("No data extracted from the file");
        }
        info!(documents = usable.len(), chunks = chunks.len(), "split documents");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .context("Failed to embed chunks")?;

        self.store
            .replace(&self.collection, &chunks, &vectors, self.embedder.model_name())
            .await?;

        let report = IndexReport {
            documents: usable.len(),
            chunks: chunks.len(),
            by_kind: count_by_kind(&usable),
        };
        info!(
            collection = %self.collection,
            chunks = report.chunks,
            model = self.embedder.model_name(),
            "index created"
        );
        Ok(report)
    }

    /// True when the collection holds at least one chunk.
    pub async fn is_ready(&self) -> Result<bool> {
        Ok(self.store.count(&self.collection).await? > 0)
    }

    /// Answer `question` with `model` from the indexed documents.
    pub async fn answer(&self, question: &str, model: &str) -> Result<String> {
        if !self.is_ready().await? {
            return Ok(NO_DOCUMENT_MESSAGE.to_string());
        }

        let queries = self.queries_for(question, model).await;
        info!(queries = queries.len(), "retrieving context");

        let mut seen = HashSet::new();
        let mut hits: Vec<RetrievedChunk> = Vec::new();
        for query in &queries {
            let qvec = embed_query(self.embedder.as_ref(), query).await?;
            for hit in self
                .store
                .similarity_search(&self.collection, &qvec, self.retrieval.k)
                .await?
            {
                if seen.insert(hit.chunk.id.clone()) {
                    hits.push(hit);
                }
            }
        }

        let context = build_context(&hits, self.retrieval.max_context_chars);
        let prompt = ANSWER_PROMPT
            .replace("{context}", &context)
            .replace("{question}", question);

        let answer = self.chat.complete(model, &prompt).await?;

        if answer.to_lowercase().contains("insufficient")
            && question.to_lowercase().contains("total")
        {
            warn!("Total query returned insufficient - may need more retrieval");
        }
        info!(chunks = hits.len(), context_chars = context.chars().count(), "answered question");
        Ok(answer)
    }

    /// The original question plus generated alternatives. Generation
    /// failures fall back to the original alone.
    async fn queries_for(&self, question: &str, model: &str) -> Vec<String> {
        let mut queries = vec![question.to_string()];
        if !self.retrieval.multi_query {
            return queries;
        }

        let prompt = QUERY_PROMPT.replace("{question}", question);
        match self.chat.complete(model, &prompt).await {
            Ok(raw) => queries.extend(parse_generated_queries(&raw, question)),
            Err(e) => warn!(error = %e, "query generation failed, using original question only"),
        }
        queries
    }

    /// Single similarity search for inspecting what a question retrieves.
    pub async fn debug_retrieval(&self, question: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let qvec = embed_query(self.embedder.as_ref(), question).await?;
        let hits = self
            .store
            .similarity_search(&self.collection, &qvec, k)
            .await?;

        let mut by_priority: BTreeMap<String, usize> = BTreeMap::new();
        for hit in &hits {
            *by_priority.entry(hit.chunk.priority.to_string()).or_insert(0) += 1;
        }
        info!(retrieved = hits.len(), ?by_priority, "debug retrieval");
        Ok(hits)
    }

    pub async fn clear(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.store.reset(&self.collection).await?;
        info!(collection = %self.collection, "vector database cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats(&self.collection).await
    }

    pub async fn list_models(&self) -> LlmResult<Vec<String>> {
        self.chat.list_models().await
    }
}

/// Pull search queries out of a model's reply: strip `Query N:` and `N.`
/// labels, drop blanks, and drop duplicates (case-insensitive, including
/// the original question).
pub fn parse_generated_queries(raw: &str, original: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(original.trim().to_lowercase());

    let mut out = Vec::new();
    for line in raw.lines() {
        let query = strip_query_label(line);
        if query.is_empty() {
            continue;
        }
        if seen.insert(query.to_lowercase()) {
            out.push(query.to_string());
            if out.len() == MAX_GENERATED_QUERIES {
                break;
            }
        }
    }
    out
}

fn strip_query_label(line: &str) -> &str {
    let mut s = line.trim().trim_start_matches(['-', '*']).trim_start();

    let labelled = s.get(..5).is_some_and(|head| head.eq_ignore_ascii_case("query"));
    if labelled {
        let rest = s[5..].trim_start();
        let after_digits = rest.trim_start_matches(|c: char| c.is_ascii_digit());
        if after_digits.len() < rest.len() || after_digits.starts_with(':') {
            s = after_digits;
            s = s.strip_prefix(':').unwrap_or(s);
        }
    } else {
        let after_digits = s.trim_start_matches(|c: char| c.is_ascii_digit());
        if after_digits.len() < s.len() {
            if let Some(rest) = after_digits
                .strip_prefix('.')
                .or_else(|| after_digits.strip_prefix(')'))
            {
                if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                    s = rest;
                }
            }
        }
    }

    s.trim().trim_matches('"').trim()
}

/// Join chunk texts with blank lines, stopping before the chunk that would
/// exceed `max_chars`. The first chunk is always included.
pub fn build_context(hits: &[RetrievedChunk], max_chars: usize) -> String {
    let mut context = String::new();
    let mut len = 0usize;
    for (i, hit) in hits.iter().enumerate() {
        let add = hit.chunk.text.chars().count() + if i == 0 { 0 } else { 2 };
        if i > 0 && len + add > max_chars {
            break;
        }
        if i > 0 {
            context.push_str("\n\n");
        }
        context.push_str(&hit.chunk.text);
        len += add;
    }
    context
}

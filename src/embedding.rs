//! Embedding providers and vector utilities.
//!
//! The [`Embedder`] trait turns a batch of texts into vectors, one per
//! input, in input order. Implementations:
//! - **[`OllamaEmbedder`]**: calls a model server's `/api/embed` endpoint
//!   with retry and backoff.
//! - **`LocalEmbedder`**: runs a model in-process via fastembed (cargo
//!   feature `local-embeddings`).
//! - **[`DisabledEmbedder`]**: always errors; used when
//!   `embedding.provider = "disabled"`.
//!
//! Also provides the BLOB encoding used by the SQLite store and
//! [`cosine_similarity`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

/// A text embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded next to each stored vector.
    fn model_name(&self) -> &str;
    /// Vector dimensionality, or `0` until the first successful call.
    fn dims(&self) -> usize;
    /// Embed `texts`, returning exactly one vector per input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed texts in batches of `batch_size`, preserving order.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    let batches = texts.chunks(batch_size.max(1));
    let total = batches.len();
    for (i, batch) in batches.enumerate() {
        debug!(batch = i + 1, total, size = batch.len(), "embedding batch");
        let vectors = embedder.embed(batch).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            );
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Embed a single query string.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

/// Build the embedder named by `embedding.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires `--features local-embeddings`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(local::LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Ollama ============

/// Embeddings from a model server's `POST /api/embed`.
///
/// Requires the model to be pulled first (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
    dims: AtomicUsize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            dims: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims.load(Ordering::Relaxed)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let vectors = parse_ollama_response(&json)?;
                        if vectors.len() != texts.len() {
                            bail!(
                                "Ollama returned {} embeddings for {} inputs",
                                vectors.len(),
                                texts.len()
                            );
                        }
                        if let Some(first) = vectors.first() {
                            self.dims.store(first.len(), Ordering::Relaxed);
                        }
                        return Ok(vectors);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "embedding request failed, retrying");
                        last_err = Some(anyhow!("Ollama API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "embedding request failed, retrying");
                    last_err = Some(anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url,
                        e
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Ollama embedding failed after retries")))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
        })
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;

    use super::Embedder;
    use crate::config::EmbeddingConfig;

    /// In-process embeddings. The model is downloaded from Hugging Face on
    /// first use and cached; later runs need no network.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let (_, dims) = fastembed_model(&config.model)?;
            Ok(Self {
                model_name: config.model.clone(),
                dims,
                batch_size: config.batch_size,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
        use fastembed::EmbeddingModel::*;
        Ok(match name {
            "all-minilm-l6-v2" => (AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (BGESmallENV15, 384),
            "bge-base-en-v1.5" => (BGEBaseENV15, 768),
            "nomic-embed-text" | "nomic-embed-text-v1.5" => (NomicEmbedTextV15, 768),
            "nomic-embed-text-v1" => (NomicEmbedTextV1, 768),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
                 nomic-embed-text, nomic-embed-text-v1",
                other
            ),
        })
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let (model_id, _) = fastembed_model(&self.model_name)?;
            let slot = Arc::clone(&self.model);
            let texts = texts.to_vec();
            let batch_size = self.batch_size;

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
                if guard.is_none() {
                    let model = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model_id).with_show_download_progress(true),
                    )
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| anyhow!("local embedding model not initialized"))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("Local embedding failed: {}", e))
            })
            .await?
        }
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use docqa::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ollama_config(url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            url: url.to_string(),
            max_retries: 1,
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[tokio::test]
    async fn disabled_embedder_errors() {
        let err = DisabledEmbedder.embed(&["x".into()]).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn ollama_embeds_and_records_dims() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "nomic-embed-text",
                "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(&ollama_config(&server.uri())).unwrap();
        assert_eq!(embedder.dims(), 0);
        let vectors = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(embedder.dims(), 3);
    }

    #[tokio::test]
    async fn ollama_count_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "embeddings": [[1.0]] })),
            )
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(&ollama_config(&server.uri())).unwrap();
        let err = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 embeddings for 2 inputs"));
    }

    #[tokio::test]
    async fn ollama_client_error_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(&ollama_config(&server.uri())).unwrap();
        let err = embedder.embed(&["a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn ollama_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(&ollama_config(&server.uri())).unwrap();
        assert!(embedder.embed(&["a".to_string()]).await.is_err());
    }

    struct Fixed;

    #[async_trait]
    impl Embedder for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[tokio::test]
    async fn batching_preserves_order() {
        let texts: Vec<String> = (1..=5).map(|n| "x".repeat(n)).collect();
        let vectors = embed_batched(&Fixed, &texts, 2).await.unwrap();
        let lens: Vec<f32> = vectors.into_iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}

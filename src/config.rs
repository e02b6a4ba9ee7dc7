//! TOML configuration.
//!
//! Every section carries defaults, so a missing config file still yields a
//! usable setup pointed at a model server on `localhost:11434`. Values are
//! validated once at load time; the rest of the crate trusts them.
//!
//! ```toml
//! [db]
//! path = "./data/docqa.sqlite"
//! collection = "financial_rag"
//!
//! [chunking]
//! chunk_size = 1500
//! chunk_overlap = 300
//!
//! [retrieval]
//! k = 100
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//!
//! [llm]
//! default_model = "llama3.1"
//!
//! [server]
//! bind = "127.0.0.1:8501"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Namespace for all chunks written by one upload.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            collection: default_collection(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/docqa.sqlite")
}
fn default_collection() -> String {
    "financial_rag".to_string()
}

/// Chunk sizes are measured in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1500
}
fn default_chunk_overlap() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks fetched per query. Spreadsheets split into many chunks, so
    /// this is deliberately large.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Ask the model for alternative phrasings before retrieving.
    #[serde(default = "default_true")]
    pub multi_query: bool,
    /// Upper bound on the context block handed to the model.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            multi_query: true,
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_k() -> usize {
    100
}
fn default_max_context_chars() -> usize {
    60_000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            url: default_ollama_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_ollama_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    /// Used when a question arrives without an explicit model.
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            default_model: None,
            temperature: 0.0,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_true")]
    pub enable_ocr: bool,
    #[serde(default = "default_ocr_dpi")]
    pub ocr_dpi: u32,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// CSVs with more rows than this also get per-category documents.
    #[serde(default = "default_csv_group_threshold")]
    pub csv_group_threshold: usize,
    /// Sheets with more rows than this are also emitted in row windows.
    #[serde(default = "default_excel_window")]
    pub excel_window_threshold: usize,
    #[serde(default = "default_excel_window")]
    pub excel_window_rows: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enable_ocr: true,
            ocr_dpi: default_ocr_dpi(),
            max_upload_bytes: default_max_upload_bytes(),
            csv_group_threshold: default_csv_group_threshold(),
            excel_window_threshold: default_excel_window(),
            excel_window_rows: default_excel_window(),
        }
    }
}

fn default_ocr_dpi() -> u32 {
    150
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_csv_group_threshold() -> usize {
    100
}
fn default_excel_window() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    finish(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        finish(Config::default())
    }
}

fn finish(mut config: Config) -> Result<Config> {
    if let Ok(host) = std::env::var("OLLAMA_HOST") {
        let url = normalize_host(&host);
        config.embedding.url = url.clone();
        config.llm.url = url;
    }
    validate(&config)?;
    Ok(config)
}

/// `OLLAMA_HOST` is commonly set without a scheme (`127.0.0.1:11434`).
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.k < 1 {
        bail!("retrieval.k must be >= 1");
    }

    if config.db.collection.trim().is_empty() {
        bail!("db.collection must not be empty");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or local.",
            other
        ),
    }

    if config.extraction.excel_window_rows == 0 {
        bail!("extraction.excel_window_rows must be > 0");
    }

    Ok(())
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const LEDGER_CSV: &str = "\
Date,Category,Description,Amount
2024-01-05,Travel,Flight to Berlin,$1200.00
2024-01-09,Rent,January office rent,2500.00
2024-01-15,Travel,Hotel,450.50
2024-02-05,Rent,February office rent,2500.00
2024-02-11,Supplies,Printer paper,89.99
2024-02-20,Travel,Taxi,35.00
";

fn docqa_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docqa"))
}

/// Temp dir with a config and a sample ledger. `model_url` is used for both
/// the embedding and chat endpoints.
fn setup_test_env(model_url: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("ledger.csv"), LEDGER_CSV).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docqa.sqlite"
collection = "test_docs"

[chunking]
chunk_size = 400
chunk_overlap = 50

[retrieval]
k = 10

[embedding]
provider = "ollama"
model = "test-embed"
url = "{url}"
max_retries = 0
timeout_secs = 5

[llm]
url = "{url}"
default_model = "test-model"
max_retries = 0
timeout_secs = 5
"#,
        root = root.display(),
        url = model_url,
    );

    let config_path = root.join("docqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_docqa_with_env(config_path, args, &[])
}

fn run_docqa_with_env(
    config_path: &Path,
    args: &[&str],
    envs: &[(&str, &str)],
) -> (String, String, bool) {
    let binary = docqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("OLLAMA_HOST")
        .env("RUST_LOG", "warn")
        .envs(envs.iter().copied())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Deterministic 4-d vectors keyed on a few ledger words.
fn fake_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    vec![
        1.0,
        if lower.contains("travel") { 1.0 } else { 0.0 },
        if lower.contains("rent") { 1.0 } else { 0.0 },
        (text.len() % 7) as f32 / 7.0,
    ]
}

/// Mock model server answering `/api/embed`, `/api/chat` and `/api/tags`.
async fn start_model_server(answer: &str) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(|req: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            let inputs = body["input"].as_array().cloned().unwrap_or_default();
            let embeddings: Vec<Vec<f32>> = inputs
                .iter()
                .map(|t| fake_embedding(t.as_str().unwrap_or_default()))
                .collect();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "test-embed",
                "embeddings": embeddings,
            }))
        })
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": { "role": "assistant", "content": answer },
            "done": true,
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "test-model" }, { "name": "other:7b" }]
        })))
        .mount(&server)
        .await;

    server
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, stderr, success) = run_docqa(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docqa.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (_, _, success1) = run_docqa(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_docqa(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_extract_prints_csv_rendering() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let csv = tmp.path().join("ledger.csv");

    let (stdout, stderr, success) = run_docqa(&config_path, &["extract", csv.to_str().unwrap()]);
    assert!(success, "extract failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("extract ledger.csv"));
    assert!(stdout.contains("=== Complete CSV Dataset ==="));
    assert!(stdout.contains("Total Rows: 6"));
    assert!(stdout.contains("=== FINANCIAL SUMMARY ==="));
    assert!(stdout.contains("Row 1: Date:2024-01-05"));
}

#[test]
fn test_ask_before_ingest_reports_missing_document() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, stderr, success) = run_docqa(&config_path, &["ask", "What is the total?"]);
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Please upload and process a financial document first."));
}

#[test]
fn test_ask_without_model_fails() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("default_model = \"test-model\"\n", "");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_docqa(&config_path, &["ask", "What is the total?"]);
    assert!(!success);
    assert!(stderr.contains("No model given"), "stderr: {}", stderr);
}

#[test]
fn test_ingest_empty_file_fails() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let empty = tmp.path().join("empty.txt");
    fs::write(&empty, "   \n").unwrap();

    let (stdout, _, success) = run_docqa(&config_path, &["ingest", empty.to_str().unwrap()]);
    assert!(!success, "ingest of empty file should fail: {}", stdout);
}

#[test]
fn test_upload_limit_enforced() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let mut content = fs::read_to_string(&config_path).unwrap();
    content.push_str("\n[extraction]\nmax_upload_bytes = 16\n");
    fs::write(&config_path, content).unwrap();

    let csv = tmp.path().join("ledger.csv");
    let (_, stderr, success) = run_docqa(&config_path, &["ingest", csv.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("upload limit"), "stderr: {}", stderr);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_models_lists_server_models() {
    let server = start_model_server("unused").await;
    let (_tmp, config_path) = setup_test_env(&server.uri());

    let (stdout, stderr, success) = run_docqa(&config_path, &["models"]);
    assert!(success, "models failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("test-model (default)"));
    assert!(stdout.contains("other:7b"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ollama_host_overrides_config_urls() {
    let server = start_model_server("unused").await;
    // Config points at a closed port; only the environment knows the server.
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let host = server.uri().trim_start_matches("http://").to_string();

    let (stdout, stderr, success) =
        run_docqa_with_env(&config_path, &["models"], &[("OLLAMA_HOST", host.as_str())]);
    assert!(success, "models failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("test-model (default)"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ingest_ask_retrieve_clear() {
    let server = start_model_server("Total travel spend is $1,685.50.").await;
    let (tmp, config_path) = setup_test_env(&server.uri());
    let csv = tmp.path().join("ledger.csv");

    let (stdout, stderr, success) = run_docqa(&config_path, &["ingest", csv.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingest ledger.csv"));
    assert!(stdout.contains("csv_complete"));
    assert!(stdout.contains("financial_summary"));
    assert!(stdout.contains("collection: test_docs"));
    assert!(stdout.contains("ok"));

    let (stdout, stderr, success) = run_docqa(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Collection:  test_docs"));
    assert!(stdout.contains("Model:       test-embed"));
    assert!(stdout.contains("Sources:     ledger.csv"));
    assert!(!stdout.contains("Chunks:      0"));

    let (stdout, stderr, success) =
        run_docqa(&config_path, &["retrieve", "travel totals", "--k", "3"]);
    assert!(success, "retrieve failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("source: ledger.csv"));
    assert!(!stdout.contains("4. ["));

    let (stdout, stderr, success) =
        run_docqa(&config_path, &["ask", "What is the total spent on travel?"]);
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Total travel spend is $1,685.50."));

    let (stdout, stderr, success) = run_docqa(&config_path, &["clear"]);
    assert!(success, "clear failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("cleared collection 'test_docs'"));

    let (stdout, _, _) = run_docqa(&config_path, &["ask", "What is the total?"]);
    assert!(stdout.contains("Please upload and process a financial document first."));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reingest_replaces_collection() {
    let server = start_model_server("ok").await;
    let (tmp, config_path) = setup_test_env(&server.uri());
    let csv = tmp.path().join("ledger.csv");

    run_docqa(&config_path, &["ingest", csv.to_str().unwrap()]);
    let (first, _, _) = run_docqa(&config_path, &["stats"]);

    run_docqa(&config_path, &["ingest", csv.to_str().unwrap()]);
    let (second, _, _) = run_docqa(&config_path, &["stats"]);

    let chunks_line = |s: &str| {
        s.lines()
            .find(|l| l.trim_start().starts_with("Chunks:"))
            .map(str::to_string)
    };
    assert!(chunks_line(&first).is_some());
    assert_eq!(chunks_line(&first), chunks_line(&second));
}

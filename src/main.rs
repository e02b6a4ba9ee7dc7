//! # docqa CLI
//!
//! The `docqa` binary serves the web UI and exposes the same operations for
//! scripting: ingest a file, ask questions, inspect retrieval.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database and run schema migrations |
//! | `docqa serve` | Start the web UI and JSON API |
//! | `docqa ingest <file>` | Extract, chunk, embed and store a document |
//! | `docqa extract <file>` | Print extracted documents without indexing |
//! | `docqa ask "<question>"` | Answer a question about the indexed document |
//! | `docqa retrieve "<question>"` | Show the chunks a question retrieves |
//! | `docqa models` | List chat models on the model server |
//! | `docqa stats` | Summarise the vector store |
//! | `docqa clear` | Empty the collection |
//!
//! ## Examples
//!
//! ```bash
//! docqa init
//! docqa ingest ./ledger-2024.xlsx
//! docqa ask "What is the total spent on travel?" --model llama3.1
//! docqa serve
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docqa::{ask, config, ingest, migrate, retrieve, server, stats};

/// docqa — local question answering over financial documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa — local question answering over financial PDFs, spreadsheets and CSVs",
    version,
    long_about = "docqa extracts text and tabular summaries from financial documents, \
    indexes them in a local vector store, and answers questions with a locally \
    hosted language model via retrieval-augmented generation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Start the web UI and JSON API on `[server].bind`.
    Serve,

    /// Extract, chunk, embed and store a file, replacing the collection.
    Ingest {
        /// PDF, Excel (.xlsx/.xls/.xlsm/.ods), CSV or text file.
        file: PathBuf,
    },

    /// Print the documents extracted from a file without indexing them.
    Extract { file: PathBuf },

    /// Answer a question about the indexed document.
    Ask {
        question: String,

        /// Chat model; defaults to `llm.default_model`.
        #[arg(long)]
        model: Option<String>,
    },

    /// Show the chunks a question retrieves, with scores.
    Retrieve {
        question: String,

        /// Number of results; defaults to `retrieval.k`.
        #[arg(long)]
        k: Option<usize>,
    },

    /// List chat models available on the model server.
    Models,

    /// Delete every chunk in the configured collection.
    Clear,

    /// Show vector store statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { file } => {
            ingest::run_ingest(&cfg, &file).await?;
        }
        Commands::Extract { file } => {
            ingest::run_extract(&cfg, &file).await?;
        }
        Commands::Ask { question, model } => {
            ask::run_ask(&cfg, &question, model).await?;
        }
        Commands::Retrieve { question, k } => {
            retrieve::run_retrieve(&cfg, &question, k).await?;
        }
        Commands::Models => {
            ask::run_models(&cfg).await?;
        }
        Commands::Clear => {
            ingest::run_clear(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

//! # docqa
//!
//! Local-first question answering over financial documents.
//!
//! docqa turns an uploaded PDF, Excel workbook or CSV file into text
//! documents (page text, table renderings, category groups, numeric
//! summaries), splits and embeds them into a local vector store, and answers
//! questions by retrieving relevant chunks and prompting a locally hosted
//! chat model. Nothing leaves the machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Extract    │──▶│  Chunk+Embed │──▶│  SQLite   │
//! │ PDF/XLS/CSV │   │              │   │  vectors  │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │ top-k
//!                                           ▼
//!                   ┌──────────┐      ┌──────────┐      ┌────────┐
//!                   │ CLI / UI │◀────▶│ Pipeline │◀────▶│  LLM   │
//!                   └──────────┘      └──────────┘      └────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF and spreadsheet extraction |
//! | [`chunk`] | Recursive text splitting and chunk priorities |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`llm`] | Chat model client |
//! | [`pipeline`] | Indexing and question answering |
//! | [`session`] | Web session state |
//! | [`server`] | Web UI and JSON API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ask;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod retrieve;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;

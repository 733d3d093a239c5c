//! # Survey Chat
//!
//! Conversational analytics over ingested survey data.
//!
//! The retrieval and orchestration logic lives in `survey-chat-core`; this
//! crate supplies the concrete pieces around it: TOML configuration, the
//! SQLite schema and store, the embedding and chat-completion HTTP clients,
//! persisted conversation history, and the `survey-chat` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │     CLI      │──▶│   Orchestrator   │──▶│    SQLite    │
//! │ survey-chat  │   │ retrieve → query │   │ FTS5 + BLOBs │
//! └──────────────┘   └────────┬─────────┘   └──────────────┘
//!                             │
//!                 ┌───────────┴───────────┐
//!                 ▼                       ▼
//!          ┌─────────────┐         ┌─────────────┐
//!          │ Embeddings  │         │  Chat LLM   │
//!          │OpenAI/Ollama│         │OpenAI/Azure │
//!          └─────────────┘         └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite survey store |
//! | [`sqlite_history`] | SQLite conversation history |
//! | [`http`] | JSON POST with retry |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat-completion clients |
//! | [`catalog`] | Survey, question and schema listing |
//! | [`search`] | Question and answer search commands |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`chat`] | Chat turn, split, suggest, title and history commands |

pub mod catalog;
pub mod chat;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod http;
pub mod llm;
pub mod migrate;
pub mod search;
pub mod sqlite_history;
pub mod sqlite_store;

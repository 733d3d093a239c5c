//! # Survey Chat Core
//!
//! Storage-agnostic logic for Survey Chat: data models, rank fusion, the
//! store abstraction, hybrid retrieval, schema introspection, prompts,
//! conversation state, and the query generation orchestrator.
//!
//! This crate contains no sqlx, HTTP client, or filesystem I/O. Concrete
//! backends (SQLite, OpenAI, Azure OpenAI) live in the `survey-chat` app
//! crate and plug in through the [`store::SurveyStore`],
//! [`embedding::Embedder`], [`llm::LanguageModel`] and
//! [`history::HistoryStore`] traits.

pub mod conversation;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod history;
pub mod introspect;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod retrieval;
pub mod store;

pub use error::{CoreError, Result};

//! Language model abstraction.
//!
//! The orchestrator treats the model as a single-shot, stateless
//! completion: one system prompt and one user message in, one string out.
//! Concrete clients (OpenAI, Azure OpenAI) live in the app crate.

use async_trait::async_trait;

use crate::error::Result;

/// Inputs for one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A chat-completion backend.
///
/// Implementations report failures as
/// [`CoreError::LanguageModel`](crate::error::CoreError::LanguageModel).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model or deployment name.
    fn model_name(&self) -> &str;

    /// Run one completion and return the text of the first choice.
    async fn generate(&self, request: &CompletionRequest) -> Result<String>;
}

//! Chat-completion clients.
//!
//! Concrete [`LanguageModel`] implementations selected by `[llm] provider`:
//! - `openai`: `POST {url}/chat/completions` with a bearer key.
//! - `azure`: `POST {url}/openai/deployments/{model}/chat/completions?api-version=...`
//!   with an `api-key` header; `model` is the deployment name.
//! - `disabled`: every call fails.
//!
//! Both remote flavors share the request/response shape and the retry
//! policy in [`http`](crate::http).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use survey_chat_core::error::CoreError;
use survey_chat_core::llm::{CompletionRequest, LanguageModel};

use crate::config::LlmConfig;
use crate::http;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const AZURE_DEFAULT_API_VERSION: &str = "2024-06-01";

/// Instantiate the model client named by `config.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" | "azure" => Ok(Arc::new(ChatCompletionsModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// A model that always fails.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &CompletionRequest) -> survey_chat_core::Result<String> {
        Err(CoreError::LanguageModel(
            "LLM provider is disabled. Set [llm] provider in config.".to_string(),
        ))
    }
}

/// OpenAI-compatible chat completions (OpenAI or Azure OpenAI).
pub struct ChatCompletionsModel {
    client: reqwest::Client,
    endpoint: String,
    auth_header: (&'static str, String),
    model: String,
    /// Azure routes by deployment and ignores `model` in the body.
    send_model: bool,
    max_retries: u32,
    service: &'static str,
}

impl ChatCompletionsModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for provider '{}'", config.provider))?;
        let key_var = config.api_key_var();
        let api_key = std::env::var(key_var)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", key_var))?;

        let (endpoint, auth_header, send_model, service) = match config.provider.as_str() {
            "azure" => {
                let base = config
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("llm.url required for provider 'azure'"))?;
                let version = config
                    .api_version
                    .as_deref()
                    .unwrap_or(AZURE_DEFAULT_API_VERSION);
                (
                    azure_endpoint(base, &model, version),
                    ("api-key", api_key),
                    false,
                    "Azure OpenAI",
                )
            }
            _ => {
                let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
                (
                    format!("{}/chat/completions", base.trim_end_matches('/')),
                    ("Authorization", format!("Bearer {}", api_key)),
                    true,
                    "OpenAI",
                )
            }
        };

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            endpoint,
            auth_header,
            model,
            send_model,
            max_retries: config.max_retries,
            service,
        })
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if self.send_model {
            body["model"] = serde_json::Value::String(self.model.clone());
        }
        body
    }
}

fn azure_endpoint(base: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        base.trim_end_matches('/'),
        deployment,
        api_version
    )
}

/// Text of `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &CompletionRequest) -> survey_chat_core::Result<String> {
        let headers = [(self.auth_header.0, self.auth_header.1.clone())];
        http::post_json(
            &self.client,
            &self.endpoint,
            &headers,
            &self.body(request),
            self.max_retries,
            self.service,
        )
        .await
        .and_then(|json| parse_completion(&json))
        .map_err(|e| CoreError::LanguageModel(format!("{:#}", e)))
    }
}

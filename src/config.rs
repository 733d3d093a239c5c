//! TOML configuration parsing and validation.
//!
//! See `config/survey-chat.example.toml` for every supported key.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use survey_chat_core::orchestrator::OrchestratorConfig;
use survey_chat_core::prompts::DEFAULT_DOMAIN_HINTS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_relevant_questions")]
    pub relevant_questions: usize,
    #[serde(default = "default_answer_top_k")]
    pub answer_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            relevant_questions: default_relevant_questions(),
            answer_top_k: default_answer_top_k(),
        }
    }
}

fn default_relevant_questions() -> usize {
    3
}
fn default_answer_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    /// Model name, or the deployment name for Azure OpenAI.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
            url: None,
            api_version: None,
            api_key_env: None,
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Environment variable holding the API key.
    pub fn api_key_var(&self) -> &str {
        match (&self.api_key_env, self.provider.as_str()) {
            (Some(var), _) => var,
            (None, "azure") => "AZURE_OPENAI_API_KEY",
            (None, _) => "OPENAI_API_KEY",
        }
    }
}

fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.3
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorSection {
    #[serde(default)]
    pub narrate_results: bool,
    #[serde(default)]
    pub decompose_questions: bool,
    #[serde(default = "default_domain_hints")]
    pub domain_hints: Vec<String>,
    #[serde(default)]
    pub schema_template: Option<String>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            narrate_results: false,
            decompose_questions: false,
            domain_hints: default_domain_hints(),
            schema_template: None,
        }
    }
}

fn default_domain_hints() -> Vec<String> {
    let mut hints: Vec<String> = DEFAULT_DOMAIN_HINTS.iter().map(|h| h.to_string()).collect();
    hints.push("Write the query in the SQLite dialect.".to_string());
    hints
}

impl Config {
    /// Orchestrator settings assembled from the `[retrieval]`, `[llm]` and
    /// `[orchestrator]` sections.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            schema_template: self.orchestrator.schema_template.clone(),
            domain_hints: self.orchestrator.domain_hints.clone(),
            top_k: self.retrieval.relevant_questions,
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
            narrate_results: self.orchestrator.narrate_results,
            decompose_questions: self.orchestrator.decompose_questions,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate retrieval
    if config.retrieval.relevant_questions < 1 {
        anyhow::bail!("retrieval.relevant_questions must be >= 1");
    }
    if config.retrieval.answer_top_k < 1 {
        anyhow::bail!("retrieval.answer_top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "openai" | "azure" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or azure.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }
    if config.llm.provider == "azure" && config.llm.url.is_none() {
        anyhow::bail!("llm.url (the Azure OpenAI endpoint) is required for provider 'azure'");
    }
    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/surveys.sqlite\"\n").unwrap();
        assert_eq!(config.retrieval.relevant_questions, 3);
        assert_eq!(config.retrieval.answer_top_k, 10);
        assert!(!config.embedding.is_enabled());
        assert!(!config.llm.is_enabled());
        assert_eq!(config.llm.max_tokens, 1024);
        assert!((config.llm.temperature - 0.3).abs() < f32::EPSILON);

        let orch = config.orchestrator_config();
        assert_eq!(orch.top_k, 3);
        assert!(orch
            .domain_hints
            .iter()
            .any(|h| h.contains("ignore null or negative answers")));
    }

    #[test]
    fn test_enabled_providers_need_models() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\ndims = 3\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let err = parse("[db]\npath = \"x\"\n[llm]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("llm.model"));

        let err = parse("[db]\npath = \"x\"\n[llm]\nprovider = \"azure\"\nmodel = \"gpt-4o\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("llm.url"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nrelevant_questions = 0\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[llm]\ntemperature = 3.5\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"local\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[llm]\nprovider = \"anthropic\"\n").is_err());
    }

    #[test]
    fn test_api_key_var() {
        let mut llm = LlmConfig {
            provider: "azure".to_string(),
            ..LlmConfig::default()
        };
        assert_eq!(llm.api_key_var(), "AZURE_OPENAI_API_KEY");
        llm.api_key_env = Some("MY_KEY".to_string());
        assert_eq!(llm.api_key_var(), "MY_KEY");
    }
}

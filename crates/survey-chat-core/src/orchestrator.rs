//! Query generation orchestrator.
//!
//! Drives one chat turn as an explicit state machine:
//!
//! 1. **Intake**: drop messages without identity, pick the latest user
//!    message as the utterance ([`Turn::begin`]).
//! 2. **Context**: embed the utterance and describe the schema
//!    concurrently, then resolve the top-K relevant questions.
//! 3. **Prompt**: render the query template with schema, relevant
//!    questions (JSON), domain hints and the bound survey id.
//! 4. **Generation**: one model call; the reply is trimmed and stripped of
//!    Markdown code fences.
//! 5. **Execution**: run the query through the store.
//! 6. **Trace**: one `tool` message per tool invocation (`embed`,
//!    `find_relevant_questions`, `execute_query`) and one `assistant`
//!    message with the answer.
//! 7. **Return**: the incoming messages plus the appended trace.
//!
//! A turn is atomic: any failure returns `Err` and no messages.
//!
//! With `decompose_questions`, step 2-4 run once per sub-question produced
//! by [`Orchestrator::split_question`] and the component queries are merged
//! with [`Orchestrator::combine_queries`] before execution.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::conversation::{transcript, ConversationMessage, Turn};
use crate::embedding::{check_dims, Embedder};
use crate::error::{CoreError, Result};
use crate::introspect::{describe_schema, describe_survey_metadata};
use crate::llm::{CompletionRequest, LanguageModel};
use crate::models::{HybridSearchResult, QueryContext, QueryRow, SurveyQuestion};
use crate::prompts::{
    self, PromptValues, DEFAULT_DOMAIN_HINTS, NARRATE_SYSTEM_PROMPT, SPLIT_SYSTEM_PROMPT,
    TITLE_SYSTEM_PROMPT,
};
use crate::retrieval::find_relevant_questions;
use crate::store::SurveyStore;

/// Answer text for an empty result set.
pub const NO_ROWS_ANSWER: &str = "The query returned no rows.";

/// Orchestrator settings, normally built from the app configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Replaces the built-in query template when set.
    pub schema_template: Option<String>,
    pub domain_hints: Vec<String>,
    /// Number of relevant questions resolved per utterance.
    pub top_k: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the model to phrase the answer from the result rows.
    pub narrate_results: bool,
    /// Split multi-part questions and combine per-component queries.
    pub decompose_questions: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            schema_template: None,
            domain_hints: DEFAULT_DOMAIN_HINTS.iter().map(|h| h.to_string()).collect(),
            top_k: 3,
            max_tokens: 1024,
            temperature: 0.3,
            narrate_results: false,
            decompose_questions: false,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn SurveyStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SurveyStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one chat turn against `survey_id`.
    ///
    /// Returns the incoming messages (minus those without identity) followed
    /// by the tool trace and the assistant answer.
    pub async fn turn(
        &self,
        survey_id: Uuid,
        messages: &[ConversationMessage],
    ) -> Result<Vec<ConversationMessage>> {
        let mut turn = Turn::begin(messages.to_vec())?;
        info!(%survey_id, utterance = turn.utterance(), "chat turn started");

        match self.run_turn(survey_id, &mut turn).await {
            Ok(()) => {
                info!(%survey_id, appended = turn.appended().len(), "chat turn finished");
                Ok(turn.into_messages())
            }
            Err(e) => {
                error!(%survey_id, error = %e, "chat turn failed");
                Err(e)
            }
        }
    }

    async fn run_turn(&self, survey_id: Uuid, turn: &mut Turn) -> Result<()> {
        let utterance = turn.utterance().to_string();

        let components = if self.config.decompose_questions {
            self.split_question(&utterance).await?
        } else {
            vec![utterance.clone()]
        };

        let query = if components.len() > 1 {
            self.decomposed_query(survey_id, &utterance, &components, turn)
                .await?
        } else {
            self.direct_query(survey_id, &utterance, turn).await?
        };

        let rows = self.store.execute_query(&query).await?;
        debug!(rows = rows.len(), "query executed");
        turn.push_tool(
            json!({
                "tool": "execute_query",
                "query": query,
                "row_count": rows.len(),
                "rows": rows,
            })
            .to_string(),
        );

        let answer = if self.config.narrate_results {
            self.narrate(&utterance, &query, &rows).await?
        } else {
            render_answer(&rows)
        };
        turn.push_assistant(answer);
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.embedder.embed(text).await?;
        check_dims(self.embedder.dims(), &vector)?;
        Ok(vector)
    }

    /// Steps 2-4 for a single utterance.
    async fn direct_query(
        &self,
        survey_id: Uuid,
        utterance: &str,
        turn: &mut Turn,
    ) -> Result<String> {
        let (embedding, schema) = futures::try_join!(
            self.embed(utterance),
            describe_schema(self.store.as_ref())
        )?;
        turn.push_tool(self.embed_trace(&embedding));

        let relevant = find_relevant_questions(
            self.store.as_ref(),
            survey_id,
            utterance,
            &embedding,
            self.config.top_k,
        )
        .await?;
        turn.push_tool(lookup_trace(&relevant));

        let template = self.config.schema_template.as_deref();
        let metadata = match template {
            Some(t) if t.contains("{metadata}") => {
                describe_survey_metadata(self.store.as_ref(), survey_id).await?
            }
            _ => String::new(),
        };
        let context = QueryContext {
            survey_id,
            relevant_questions: relevant.into_iter().map(|r| r.item).collect(),
            schema,
            metadata,
        };

        let relevant_json = serde_json::to_string(&context.relevant_questions)?;
        let system = prompts::query_system_prompt(
            template,
            &PromptValues {
                schema: &context.schema,
                relevant_questions: &relevant_json,
                domain_hints: &self.config.domain_hints,
                survey_id: context.survey_id,
                metadata: &context.metadata,
            },
        );
        self.generate_query(system, utterance).await
    }

    async fn decomposed_query(
        &self,
        survey_id: Uuid,
        utterance: &str,
        components: &[String],
        turn: &mut Turn,
    ) -> Result<String> {
        let schema = describe_schema(self.store.as_ref()).await?;
        let mut queries = Vec::with_capacity(components.len());
        for component in components {
            let embedding = self.embed(component).await?;
            turn.push_tool(self.embed_trace(&embedding));

            let relevant = find_relevant_questions(
                self.store.as_ref(),
                survey_id,
                component,
                &embedding,
                self.config.top_k,
            )
            .await?;
            turn.push_tool(lookup_trace(&relevant));

            let questions: Vec<SurveyQuestion> = relevant.into_iter().map(|r| r.item).collect();
            queries.push(
                self.aggregate_query(&schema, component, survey_id, &questions)
                    .await?,
            );
        }

        let combined = self.combine_with_schema(&schema, utterance, &queries).await?;
        turn.push_tool(
            json!({
                "tool": "combine_queries",
                "components": queries,
                "query": combined,
            })
            .to_string(),
        );
        Ok(combined)
    }

    fn embed_trace(&self, embedding: &[f32]) -> String {
        json!({
            "tool": "embed",
            "model": self.embedder.model_name(),
            "dims": embedding.len(),
        })
        .to_string()
    }

    fn request(&self, system: String, user: impl Into<String>) -> CompletionRequest {
        CompletionRequest {
            system,
            user: user.into(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    async fn generate_query(&self, system: String, user: &str) -> Result<String> {
        debug!(prompt_chars = system.len(), "generating query");
        let raw = self.llm.generate(&self.request(system, user)).await?;
        let query = strip_code_fences(&raw);
        if query.is_empty() {
            return Err(CoreError::LanguageModel(
                "model returned an empty query".to_string(),
            ));
        }
        Ok(query)
    }

    /// Ask the model to split a multi-part question into sub-questions.
    ///
    /// Falls back to the utterance itself when the reply has no usable line.
    pub async fn split_question(&self, utterance: &str) -> Result<Vec<String>> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(CoreError::invalid_argument("utterance is blank"));
        }
        let reply = self
            .llm
            .generate(&self.request(SPLIT_SYSTEM_PROMPT.to_string(), utterance))
            .await?;
        let components = reply_lines(&reply);
        debug!(components = components.len(), "question split");
        if components.is_empty() {
            return Ok(vec![utterance.to_string()]);
        }
        Ok(components)
    }

    /// Generate an aggregate query over `relevant_questions`, scoped to
    /// `survey_id`.
    pub async fn generate_aggregate_query(
        &self,
        utterance: &str,
        survey_id: Uuid,
        relevant_questions: &[SurveyQuestion],
    ) -> Result<String> {
        let schema = describe_schema(self.store.as_ref()).await?;
        self.aggregate_query(&schema, utterance, survey_id, relevant_questions)
            .await
    }

    async fn aggregate_query(
        &self,
        schema: &str,
        utterance: &str,
        survey_id: Uuid,
        relevant_questions: &[SurveyQuestion],
    ) -> Result<String> {
        let relevant_json = serde_json::to_string(relevant_questions)?;
        let system = prompts::aggregate_system_prompt(schema, &relevant_json, survey_id);
        self.generate_query(system, utterance).await
    }

    /// Merge component queries into one query answering `utterance`.
    ///
    /// A single query is returned unchanged without a model call.
    pub async fn combine_queries(&self, utterance: &str, queries: &[String]) -> Result<String> {
        let schema = describe_schema(self.store.as_ref()).await?;
        self.combine_with_schema(&schema, utterance, queries).await
    }

    async fn combine_with_schema(
        &self,
        schema: &str,
        utterance: &str,
        queries: &[String],
    ) -> Result<String> {
        match queries {
            [] => Err(CoreError::invalid_argument("no queries to combine")),
            [single] => Ok(single.clone()),
            _ => {
                let system = prompts::combine_system_prompt(schema, utterance, queries);
                self.generate_query(system, utterance).await
            }
        }
    }

    /// Suggest follow-up questions for a survey given the conversation so
    /// far.
    pub async fn suggest_questions(
        &self,
        survey_id: Uuid,
        history: &[ConversationMessage],
    ) -> Result<Vec<String>> {
        if self.store.get_survey(survey_id).await?.is_none() {
            return Err(CoreError::not_found(format!("survey {}", survey_id)));
        }
        let metadata = describe_survey_metadata(self.store.as_ref(), survey_id).await?;
        let conversation = transcript(history);
        let user = if conversation.is_empty() {
            "The conversation has not started yet.".to_string()
        } else {
            conversation
        };
        let reply = self
            .llm
            .generate(&self.request(prompts::suggest_system_prompt(&metadata), user))
            .await?;
        Ok(reply_lines(&reply))
    }

    /// Generate a short title for a conversation.
    pub async fn generate_title(&self, messages: &[ConversationMessage]) -> Result<String> {
        let conversation = transcript(messages);
        if conversation.is_empty() {
            return Err(CoreError::invalid_argument("conversation has no messages"));
        }
        let reply = self
            .llm
            .generate(&self.request(TITLE_SYSTEM_PROMPT.to_string(), conversation))
            .await?;
        Ok(reply
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string())
    }

    async fn narrate(&self, utterance: &str, query: &str, rows: &[QueryRow]) -> Result<String> {
        let user = format!(
            "Question: {}\nQuery: {}\nRows: {}",
            utterance,
            query,
            serde_json::to_string(rows)?
        );
        let reply = self
            .llm
            .generate(&self.request(NARRATE_SYSTEM_PROMPT.to_string(), user))
            .await?;
        Ok(reply.trim().to_string())
    }
}

fn lookup_trace(relevant: &[HybridSearchResult<SurveyQuestion>]) -> String {
    let questions: Vec<serde_json::Value> = relevant
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "question": r.item.question,
                "score": r.score,
                "semantic_rank": r.semantic_rank,
                "keyword_rank": r.keyword_rank,
            })
        })
        .collect();
    json!({
        "tool": "find_relevant_questions",
        "questions": questions,
    })
    .to_string()
}

/// Trim a generated query and drop a surrounding Markdown code fence.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // drop the info string (```sql)
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

/// Non-blank reply lines with list markers removed.
fn reply_lines(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(strip_list_marker)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return rest.trim();
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim();
        }
    }
    line
}

/// Render a result set as the assistant answer.
///
/// A single cell becomes its value, an empty result [`NO_ROWS_ANSWER`],
/// anything else a Markdown table.
pub fn render_answer(rows: &[QueryRow]) -> String {
    let Some(first) = rows.first().filter(|r| !r.is_empty()) else {
        return NO_ROWS_ANSWER.to_string();
    };
    if rows.len() == 1 && first.len() == 1 {
        return first.columns[0].1.to_string();
    }

    let cell = |s: String| s.replace('|', "\\|").replace('\n', " ");
    let header: Vec<String> = first.columns.iter().map(|(n, _)| cell(n.clone())).collect();
    let mut out = format!("| {} |\n", header.join(" | "));
    out.push_str(&format!(
        "|{}\n",
        header.iter().map(|_| " --- |").collect::<String>()
    ));
    for row in rows {
        let values: Vec<String> = row.columns.iter().map(|(_, v)| cell(v.to_string())).collect();
        out.push_str(&format!("| {} |\n", values.join(" | ")));
    }
    out.trim_end().to_string()
}

//! Prompt templates for query generation and the auxiliary model calls.
//!
//! The query-generation template may be replaced through
//! [`OrchestratorConfig::schema_template`](crate::orchestrator::OrchestratorConfig).
//! Supported placeholders: `{schema}`, `{relevant_questions}`,
//! `{domain_hints}`, `{survey_id}`, `{metadata}`.

use uuid::Uuid;

/// Domain preamble shared by the query-generation prompts.
pub const NPS_PREAMBLE: &str = "\
Your goal is to answer user questions about survey data inside of a SQL database. \
Do not change the original question.
These surveys are primarily about Net Promoter Score (NPS): a measure of customer \
loyalty as an integer between 0 and 10.";

pub const DEFAULT_QUERY_TEMPLATE: &str = "\
{preamble}

Given the following SQL schema containing survey data:

{schema}
SurveyQuestion rows describe the questions of a survey. SurveyQuestionAnswer rows \
hold individual answers; SurveyResponseId groups the answers of one respondent. \
TextAnswer is set for string questions and NumericAnswer for numeric questions.

The most relevant survey questions for the user question are:
{relevant_questions}

Guidelines:
{domain_hints}
- Only query rows where SurveyId equals '{survey_id}'.

Generate a single syntactically correct SQL query that answers the user question. \
Only provide the SQL query. Do not encapsulate it in markdown.";

/// Hints used when the configuration does not provide any.
pub const DEFAULT_DOMAIN_HINTS: &[&str] = &[
    "For aggregates, ignore null or negative answers.",
    "Use the question descriptions as hints to pick the best matching question.",
    "Consider that multi-part questions may require subqueries.",
];

pub const SPLIT_SYSTEM_PROMPT: &str = "\
Your goal is to break down questions about survey data into components that can be \
answered with SQL queries.
If something would be performed like a subquery, a join, a filter or a group by, \
consider it a single component. Do not change the original question.
Keep interpretations as simple as possible. Avoid assumptions.
Each component must be on its own line. Output nothing else.";

pub const TITLE_SYSTEM_PROMPT: &str = "\
Summarize the following conversation about survey data as a short title of at most \
six words. Reply with the title only, without quotes or punctuation at the end.";

pub const NARRATE_SYSTEM_PROMPT: &str = "\
You answer questions about survey data. You are given the user question, the SQL \
query that was executed and its result rows as JSON. Answer the question in a few \
sentences using only the result rows, and mention the query you used.";

/// Values substituted into a query template.
#[derive(Debug, Clone)]
pub struct PromptValues<'a> {
    pub schema: &'a str,
    pub relevant_questions: &'a str,
    pub domain_hints: &'a [String],
    pub survey_id: Uuid,
    pub metadata: &'a str,
}

fn render_hints(hints: &[String]) -> String {
    hints
        .iter()
        .map(|h| format!("- {}", h.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fill a template in one left-to-right pass. Unknown placeholders are left
/// untouched, and substituted text is never scanned again.
pub fn render_template(template: &str, values: &PromptValues<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            break;
        };
        let value = match &tail[1..close] {
            "preamble" => Some(NPS_PREAMBLE.to_string()),
            "schema" => Some(values.schema.to_string()),
            "relevant_questions" => Some(values.relevant_questions.to_string()),
            "domain_hints" => Some(render_hints(values.domain_hints)),
            "survey_id" => Some(values.survey_id.to_string()),
            "metadata" => Some(values.metadata.to_string()),
            _ => None,
        };
        match value {
            Some(value) => {
                out.push_str(&value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// System prompt for the single query of a turn.
pub fn query_system_prompt(template: Option<&str>, values: &PromptValues<'_>) -> String {
    render_template(template.unwrap_or(DEFAULT_QUERY_TEMPLATE), values)
}

/// System prompt for an aggregate over the relevant questions, with the
/// survey id bound literally.
pub fn aggregate_system_prompt(schema: &str, relevant_questions: &str, survey_id: Uuid) -> String {
    format!(
        "{preamble}

Given the following SQL schema containing survey data:

{schema}
and the top most relevant survey questions for the user question: {relevant_questions}

Generate a syntactically correct SQL query to answer the user question.
Consider that multi-part questions may require subqueries.
Only provide the SQL query. Do not encapsulate it in markdown.
For aggregates, ignore null or negative answers.
If no relevant question is provided, search for the most relevant question based on \
the user question and check answer text for clues.
Only aggregate results where SurveyId equals '{survey_id}'.",
        preamble = NPS_PREAMBLE,
    )
}

/// System prompt asking the model to merge component queries.
pub fn combine_system_prompt(schema: &str, utterance: &str, queries: &[String]) -> String {
    format!(
        "Given the following SQL schema containing survey data:

{schema}
Combine the following SQL queries into a single query that answers the user \
question: \"{utterance}\".
Only provide the SQL query. Do not encapsulate it in markdown.

{queries}",
        queries = queries.join("\n"),
    )
}

/// System prompt for follow-up question suggestions.
pub fn suggest_system_prompt(metadata: &str) -> String {
    format!(
        "You help analysts explore a survey. The survey questions are listed as \
id|question|dataType|description:

{metadata}
Based on these questions and the conversation so far, suggest up to five short \
questions the analyst could ask next. Put each question on its own line and output \
nothing else."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_fills_every_placeholder() {
        let hints = vec!["Use SQLite syntax.".to_string()];
        let survey_id = Uuid::nil();
        let prompt = query_system_prompt(
            None,
            &PromptValues {
                schema: "Table: Survey\n- Id (TEXT, not null)\n",
                relevant_questions: "[{\"Question\":\"NPS Score\"}]",
                domain_hints: &hints,
                survey_id,
                metadata: "",
            },
        );
        assert!(prompt.contains("Table: Survey\n- Id (TEXT, not null)"));
        assert!(prompt.contains("\"Question\":\"NPS Score\""));
        assert!(prompt.contains("- Use SQLite syntax."));
        assert!(prompt.contains(&format!("SurveyId equals '{}'", survey_id)));
        assert!(prompt.contains("Do not encapsulate it in markdown"));
        for placeholder in ["{schema}", "{relevant_questions}", "{domain_hints}", "{survey_id}"] {
            assert!(!prompt.contains(placeholder));
        }
    }

    #[test]
    fn test_custom_template() {
        let prompt = query_system_prompt(
            Some("survey={survey_id} meta={metadata}"),
            &PromptValues {
                schema: "",
                relevant_questions: "",
                domain_hints: &[],
                survey_id: Uuid::nil(),
                metadata: "x|y|numeric|",
            },
        );
        assert_eq!(
            prompt,
            "survey=00000000-0000-0000-0000-000000000000 meta=x|y|numeric|"
        );
    }

    #[test]
    fn test_inserted_text_is_not_expanded() {
        let prompt = render_template(
            "questions={relevant_questions} {unknown} {json: {schema}}",
            &PromptValues {
                schema: "S",
                relevant_questions: "[{\"Question\":\"Rate {metadata} and {survey_id}\"}]",
                domain_hints: &[],
                survey_id: Uuid::nil(),
                metadata: "SECRET-METADATA",
            },
        );
        assert_eq!(
            prompt,
            "questions=[{\"Question\":\"Rate {metadata} and {survey_id}\"}] {unknown} {json: S}"
        );
    }

    #[test]
    fn test_aggregate_prompt_binds_survey_id() {
        let id = Uuid::new_v4();
        let prompt = aggregate_system_prompt("schema", "[]", id);
        assert!(prompt.contains("ignore null or negative answers"));
        assert!(prompt.contains(&id.to_string()));
    }
}

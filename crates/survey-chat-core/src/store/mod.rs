//! Storage abstraction for Survey Chat.
//!
//! The [`SurveyStore`] trait defines every storage operation needed by
//! retrieval, introspection, and query execution, enabling pluggable
//! backends (SQLite in the app crate, in-memory for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! Survey scoping is a backend responsibility: every candidate query takes
//! a `survey_id` and must filter on it *before* ranking.

pub mod memory;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::fusion::{KeywordCandidate, SemanticCandidate};
use crate::models::{QueryRow, Survey, SurveyQuestion, SurveyQuestionAnswer};

/// A column of a base table, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// A base table and its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// An answer eligible for semantic ranking, with its distance to the query.
#[derive(Debug, Clone)]
pub struct AnswerCandidate {
    pub answer: SurveyQuestionAnswer,
    pub distance: f64,
}

/// Columns of `SurveyQuestionAnswer` that callers may filter and sort on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnswerColumn {
    SurveyQuestionId,
    SurveyResponseId,
    PositiveSentimentConfidenceScore,
    NeutralSentimentConfidenceScore,
    NegativeSentimentConfidenceScore,
}

impl AnswerColumn {
    pub const ALL: [AnswerColumn; 5] = [
        AnswerColumn::SurveyQuestionId,
        AnswerColumn::SurveyResponseId,
        AnswerColumn::PositiveSentimentConfidenceScore,
        AnswerColumn::NeutralSentimentConfidenceScore,
        AnswerColumn::NegativeSentimentConfidenceScore,
    ];

    /// The SQL column name.
    pub fn column_name(&self) -> &'static str {
        match self {
            AnswerColumn::SurveyQuestionId => "SurveyQuestionId",
            AnswerColumn::SurveyResponseId => "SurveyResponseId",
            AnswerColumn::PositiveSentimentConfidenceScore => "PositiveSentimentConfidenceScore",
            AnswerColumn::NeutralSentimentConfidenceScore => "NeutralSentimentConfidenceScore",
            AnswerColumn::NegativeSentimentConfidenceScore => "NegativeSentimentConfidenceScore",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.column_name().eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                CoreError::invalid_argument(format!("unsupported answer column '{}'", name))
            })
    }

    fn is_identifier(&self) -> bool {
        matches!(
            self,
            AnswerColumn::SurveyQuestionId | AnswerColumn::SurveyResponseId
        )
    }

    /// The value of this column on `answer`, `None` when SQL would see NULL.
    pub fn value_of(&self, answer: &SurveyQuestionAnswer) -> Option<FilterValue> {
        match self {
            AnswerColumn::SurveyQuestionId => {
                Some(FilterValue::Text(answer.survey_question_id.to_string()))
            }
            AnswerColumn::SurveyResponseId => {
                Some(FilterValue::Text(answer.survey_response_id.to_string()))
            }
            AnswerColumn::PositiveSentimentConfidenceScore => {
                answer.sentiment.positive.map(FilterValue::Number)
            }
            AnswerColumn::NeutralSentimentConfidenceScore => {
                answer.sentiment.neutral.map(FilterValue::Number)
            }
            AnswerColumn::NegativeSentimentConfidenceScore => {
                answer.sentiment.negative.map(FilterValue::Number)
            }
        }
    }
}

impl fmt::Display for AnswerColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Comparison operators supported in answer filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterOperator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOperator {
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::NotEq => "<>",
            FilterOperator::Lt => "<",
            FilterOperator::Le => "<=",
            FilterOperator::Gt => ">",
            FilterOperator::Ge => ">=",
        }
    }

    pub fn parse(op: &str) -> Result<Self> {
        match op.trim() {
            "=" | "==" => Ok(FilterOperator::Eq),
            "<>" | "!=" => Ok(FilterOperator::NotEq),
            "<" => Ok(FilterOperator::Lt),
            "<=" => Ok(FilterOperator::Le),
            ">" => Ok(FilterOperator::Gt),
            ">=" => Ok(FilterOperator::Ge),
            other => Err(CoreError::invalid_argument(format!(
                "unsupported filter operator '{}'",
                other
            ))),
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            FilterOperator::Eq => ordering == Ordering::Equal,
            FilterOperator::NotEq => ordering != Ordering::Equal,
            FilterOperator::Lt => ordering == Ordering::Less,
            FilterOperator::Le => ordering != Ordering::Greater,
            FilterOperator::Gt => ordering == Ordering::Greater,
            FilterOperator::Ge => ordering != Ordering::Less,
        }
    }
}

/// A bound filter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Number(f64),
}

impl FilterValue {
    fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (FilterValue::Text(a), FilterValue::Text(b)) => Some(a.cmp(b)),
            (FilterValue::Number(a), FilterValue::Number(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// A predicate `column <op> value` composed onto the answer search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerFilter {
    pub column: AnswerColumn,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl AnswerFilter {
    pub fn new(column: AnswerColumn, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            column,
            operator,
            value,
        }
    }

    /// Identifier columns take UUID text; sentiment columns take numbers.
    pub fn validate(&self) -> Result<()> {
        match (&self.value, self.column.is_identifier()) {
            (FilterValue::Text(t), true) => {
                Uuid::parse_str(t).map_err(|_| {
                    CoreError::invalid_argument(format!(
                        "{} filter expects a UUID, got '{}'",
                        self.column, t
                    ))
                })?;
                Ok(())
            }
            (FilterValue::Number(n), false) if n.is_finite() => Ok(()),
            _ => Err(CoreError::invalid_argument(format!(
                "filter value {:?} does not fit column {}",
                self.value, self.column
            ))),
        }
    }

    /// Evaluate against an answer with SQL semantics (NULL never matches).
    pub fn matches(&self, answer: &SurveyQuestionAnswer) -> bool {
        let value = match self.column.value_of(answer) {
            Some(v) => v,
            None => return false,
        };
        let normalized = match &self.value {
            FilterValue::Text(t) => FilterValue::Text(t.to_ascii_lowercase()),
            other => other.clone(),
        };
        value
            .compare(&normalized)
            .map(|o| self.operator.accepts(o))
            .unwrap_or(false)
    }
}

/// A secondary sort key for answer search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnswerOrdering {
    pub column: AnswerColumn,
    pub descending: bool,
}

impl AnswerOrdering {
    /// Compare two answers on this key; NULLs sort last in both directions.
    pub fn compare(&self, a: &SurveyQuestionAnswer, b: &SurveyQuestionAnswer) -> Ordering {
        match (self.column.value_of(a), self.column.value_of(b)) {
            (Some(x), Some(y)) => {
                let o = x.compare(&y).unwrap_or(Ordering::Equal);
                if self.descending {
                    o.reverse()
                } else {
                    o
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "give",
    "how", "in", "is", "it", "me", "of", "on", "or", "show", "tell", "that", "the", "this", "to",
    "was", "were", "what", "which", "who", "with",
];

/// Split free text into lowercase search terms.
///
/// Non-alphanumeric characters separate terms, noise words are dropped,
/// and duplicates are removed (first occurrence wins).
pub fn keyword_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let term = raw.to_lowercase();
        if STOPWORDS.contains(&term.as_str()) || terms.contains(&term) {
            continue;
        }
        terms.push(term);
    }
    terms
}

/// Abstract storage backend for surveys.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list_surveys`](SurveyStore::list_surveys) | All surveys |
/// | [`get_survey`](SurveyStore::get_survey) | One survey by id |
/// | [`list_questions`](SurveyStore::list_questions) | Questions of a survey |
/// | [`get_questions`](SurveyStore::get_questions) | Questions by id |
/// | [`semantic_question_candidates`](SurveyStore::semantic_question_candidates) | Vector candidates |
/// | [`keyword_question_candidates`](SurveyStore::keyword_question_candidates) | Full-text candidates |
/// | [`semantic_answer_candidates`](SurveyStore::semantic_answer_candidates) | Answer vector candidates |
/// | [`execute_query`](SurveyStore::execute_query) | Run a generated query |
/// | [`describe_tables`](SurveyStore::describe_tables) | Base-table schema |
#[async_trait]
pub trait SurveyStore: Send + Sync {
    async fn list_surveys(&self) -> Result<Vec<Survey>>;

    async fn get_survey(&self, id: Uuid) -> Result<Option<Survey>>;

    /// Questions of a survey, ordered by question text then id.
    async fn list_questions(&self, survey_id: Uuid) -> Result<Vec<SurveyQuestion>>;

    /// Questions by id, in no particular order. Unknown ids are skipped.
    async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<SurveyQuestion>>;

    /// Questions (any survey) whose embedding has not been computed yet.
    async fn questions_missing_embedding(&self, limit: Option<usize>)
        -> Result<Vec<SurveyQuestion>>;

    /// Up to `limit` embedded questions of the survey, nearest first.
    ///
    /// Stored vectors whose length differs from `query_vec` are skipped.
    async fn semantic_question_candidates(
        &self,
        survey_id: Uuid,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SemanticCandidate>>;

    /// Up to `limit` questions of the survey matching any term of `query`,
    /// most relevant first. With `embedded_only`, questions lacking an
    /// embedding are excluded.
    async fn keyword_question_candidates(
        &self,
        survey_id: Uuid,
        query: &str,
        limit: usize,
        embedded_only: bool,
    ) -> Result<Vec<KeywordCandidate>>;

    /// Every text answer of the survey with an embedding of the query's
    /// dimension that passes all `filters`, with its cosine distance to
    /// `query_vec`.
    async fn semantic_answer_candidates(
        &self,
        survey_id: Uuid,
        query_vec: &[f32],
        filters: &[AnswerFilter],
    ) -> Result<Vec<AnswerCandidate>>;

    /// Execute an arbitrary query and return all rows.
    ///
    /// Backend errors surface as
    /// [`CoreError::QueryExecution`] with the message unmodified.
    async fn execute_query(&self, query: &str) -> Result<Vec<QueryRow>>;

    /// Base tables visible to generated queries, sorted by name, columns in
    /// ordinal order.
    async fn describe_tables(&self) -> Result<Vec<TableSchema>>;

    async fn upsert_survey(&self, survey: &Survey) -> Result<()>;

    async fn upsert_question(&self, question: &SurveyQuestion) -> Result<()>;

    async fn upsert_answer(&self, answer: &SurveyQuestionAnswer) -> Result<()>;

    async fn set_question_embedding(&self, question_id: Uuid, vector: &[f32]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SentimentScores;

    fn answer(positive: Option<f64>) -> SurveyQuestionAnswer {
        SurveyQuestionAnswer::from_columns(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::from_u128(42),
            Some("fine".to_string()),
            None,
        )
        .unwrap()
        .with_sentiment(SentimentScores {
            positive,
            neutral: None,
            negative: None,
        })
    }

    #[test]
    fn test_keyword_terms() {
        assert_eq!(
            keyword_terms("What is the average NPS score?"),
            vec!["average", "nps", "score"]
        );
        assert!(keyword_terms("?? !!").is_empty());
        assert_eq!(keyword_terms("Score score SCORE"), vec!["score"]);
    }

    #[test]
    fn test_filter_validation() {
        let ok = AnswerFilter::new(
            AnswerColumn::SurveyQuestionId,
            FilterOperator::Eq,
            FilterValue::Text(Uuid::nil().to_string()),
        );
        assert!(ok.validate().is_ok());

        let bad_uuid = AnswerFilter::new(
            AnswerColumn::SurveyResponseId,
            FilterOperator::Eq,
            FilterValue::Text("1; DROP TABLE Survey".to_string()),
        );
        assert!(bad_uuid.validate().is_err());

        let bad_kind = AnswerFilter::new(
            AnswerColumn::PositiveSentimentConfidenceScore,
            FilterOperator::Gt,
            FilterValue::Text("high".to_string()),
        );
        assert!(bad_kind.validate().is_err());
    }

    #[test]
    fn test_filter_matches_with_null_semantics() {
        let f = AnswerFilter::new(
            AnswerColumn::PositiveSentimentConfidenceScore,
            FilterOperator::Ge,
            FilterValue::Number(0.5),
        );
        assert!(f.matches(&answer(Some(0.8))));
        assert!(!f.matches(&answer(Some(0.2))));
        assert!(!f.matches(&answer(None)));

        let by_question = AnswerFilter::new(
            AnswerColumn::SurveyQuestionId,
            FilterOperator::Eq,
            FilterValue::Text(Uuid::from_u128(42).to_string().to_uppercase()),
        );
        assert!(by_question.matches(&answer(None)));
    }

    #[test]
    fn test_ordering_puts_nulls_last() {
        let ord = AnswerOrdering {
            column: AnswerColumn::PositiveSentimentConfidenceScore,
            descending: true,
        };
        let high = answer(Some(0.9));
        let low = answer(Some(0.1));
        let none = answer(None);
        assert_eq!(ord.compare(&high, &low), Ordering::Less);
        assert_eq!(ord.compare(&none, &low), Ordering::Greater);
    }

    #[test]
    fn test_parse_closed_sets() {
        assert_eq!(
            AnswerColumn::parse("surveyquestionid").unwrap(),
            AnswerColumn::SurveyQuestionId
        );
        assert!(AnswerColumn::parse("TextAnswer; --").is_err());
        assert_eq!(FilterOperator::parse("!=").unwrap(), FilterOperator::NotEq);
        assert!(FilterOperator::parse("LIKE").is_err());
    }
}

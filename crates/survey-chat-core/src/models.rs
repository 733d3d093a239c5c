//! Core data models: surveys, questions, answers, and the transient
//! structures that flow through retrieval and query execution.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// An uploaded survey dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Survey {
    pub id: Uuid,
    pub filename: String,
    pub version: String,
}

/// The type of answer a question collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Numeric,
    String,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Numeric => "numeric",
            DataType::String => "string",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CoreError;

    /// Accepts `numeric`, `string`, and the ingestion tool's `text` alias.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "numeric" => Ok(DataType::Numeric),
            "string" | "text" => Ok(DataType::String),
            other => Err(CoreError::invalid_argument(format!(
                "unknown data type '{}', expected numeric or string",
                other
            ))),
        }
    }
}

/// A question belonging to exactly one survey.
///
/// Serializes with the `SurveyQuestion` column names so the JSON handed to
/// the model lines up with the schema it writes queries against. The
/// embedding is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SurveyQuestion {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub question: String,
    pub data_type: DataType,
    pub description: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl SurveyQuestion {
    pub fn new(
        survey_id: Uuid,
        question: impl Into<String>,
        data_type: DataType,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            survey_id,
            question: question.into(),
            data_type,
            description,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Text used to compute the question's embedding.
    pub fn embedding_text(&self) -> String {
        match self.description.as_deref() {
            Some(d) if !d.trim().is_empty() => format!("{}\n{}", self.question, d),
            _ => self.question.clone(),
        }
    }
}

/// The single populated answer value of a [`SurveyQuestionAnswer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Numeric(f64),
    Text(String),
}

impl AnswerValue {
    pub fn data_type(&self) -> DataType {
        match self {
            AnswerValue::Numeric(_) => DataType::Numeric,
            AnswerValue::Text(_) => DataType::String,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(t) => Some(t),
            AnswerValue::Numeric(_) => None,
        }
    }

    pub fn numeric(&self) -> Option<f64> {
        match self {
            AnswerValue::Numeric(n) => Some(*n),
            AnswerValue::Text(_) => None,
        }
    }
}

/// Independent sentiment confidence scores for a text answer.
///
/// The three values are not a distribution and are stored as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SentimentScores {
    pub positive: Option<f64>,
    pub neutral: Option<f64>,
    pub negative: Option<f64>,
}

/// One respondent's answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SurveyQuestionAnswer {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub survey_response_id: Uuid,
    pub survey_question_id: Uuid,
    pub answer: AnswerValue,
    pub sentiment: SentimentScores,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl SurveyQuestionAnswer {
    /// Build an answer from the nullable `TextAnswer` / `NumericAnswer`
    /// column pair.
    ///
    /// Exactly one of the two must be populated; both or neither is
    /// rejected with [`CoreError::InvalidArgument`].
    pub fn from_columns(
        id: Uuid,
        survey_id: Uuid,
        survey_response_id: Uuid,
        survey_question_id: Uuid,
        text_answer: Option<String>,
        numeric_answer: Option<f64>,
    ) -> Result<Self> {
        let answer = match (text_answer, numeric_answer) {
            (Some(text), None) => AnswerValue::Text(text),
            (None, Some(n)) => AnswerValue::Numeric(n),
            (Some(_), Some(_)) => {
                return Err(CoreError::invalid_argument(format!(
                    "answer {} has both a text and a numeric value",
                    id
                )))
            }
            (None, None) => {
                return Err(CoreError::invalid_argument(format!(
                    "answer {} has neither a text nor a numeric value",
                    id
                )))
            }
        };
        Ok(Self {
            id,
            survey_id,
            survey_response_id,
            survey_question_id,
            answer,
            sentiment: SentimentScores::default(),
            embedding: None,
        })
    }

    /// Build a new answer to `question`, checking that the value variant
    /// matches the question's data type.
    pub fn for_question(
        question: &SurveyQuestion,
        survey_response_id: Uuid,
        answer: AnswerValue,
    ) -> Result<Self> {
        if answer.data_type() != question.data_type {
            return Err(CoreError::invalid_argument(format!(
                "question {} expects a {} answer, got {}",
                question.id,
                question.data_type,
                answer.data_type()
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            survey_id: question.survey_id,
            survey_response_id,
            survey_question_id: question.id,
            answer,
            sentiment: SentimentScores::default(),
            embedding: None,
        })
    }

    pub fn with_sentiment(mut self, sentiment: SentimentScores) -> Self {
        self.sentiment = sentiment;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn text_answer(&self) -> Option<&str> {
        self.answer.text()
    }

    pub fn numeric_answer(&self) -> Option<f64> {
        self.answer.numeric()
    }
}

/// A fused ranking entry carrying its source entity.
#[derive(Debug, Clone, Serialize)]
pub struct HybridSearchResult<T> {
    pub id: Uuid,
    pub score: f64,
    pub semantic_rank: Option<u32>,
    pub keyword_rank: Option<u32>,
    pub item: T,
}

/// Grounding context assembled for one request.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub survey_id: Uuid,
    pub relevant_questions: Vec<SurveyQuestion>,
    pub schema: String,
    pub metadata: String,
}

/// A single scalar cell of a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Integer(i) => Some(*i as f64),
            ScalarValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("NULL"),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Integer(i) => write!(f, "{}", i),
            ScalarValue::Number(n) => write!(f, "{}", n),
            ScalarValue::Text(t) => f.write_str(t),
        }
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ScalarValue::Null => serializer.serialize_none(),
            ScalarValue::Bool(b) => serializer.serialize_bool(*b),
            ScalarValue::Integer(i) => serializer.serialize_i64(*i),
            ScalarValue::Number(n) => serializer.serialize_f64(*n),
            ScalarValue::Text(t) => serializer.serialize_str(t),
        }
    }
}

/// One result row: column names paired with values, in select-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRow {
    pub columns: Vec<(String, ScalarValue)>,
}

impl QueryRow {
    pub fn new(columns: Vec<(String, ScalarValue)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&ScalarValue> {
        self.columns
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for QueryRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

//! In-memory [`SurveyStore`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine distance over all stored vectors of
//! the query's dimension;
//! keyword relevance is the number of distinct query terms found in the
//! question text or description.
//!
//! There is no query engine: [`InMemoryStore::register_query_result`]
//! registers the rows a given query text should return, and any other
//! query fails with [`CoreError::QueryExecution`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::embedding::cosine_distance;
use crate::error::{CoreError, Result};
use crate::fusion::{KeywordCandidate, SemanticCandidate};
use crate::models::{QueryRow, Survey, SurveyQuestion, SurveyQuestionAnswer};

use super::{
    keyword_terms, AnswerCandidate, AnswerFilter, ColumnSchema, SurveyStore, TableSchema,
};

/// In-memory store for tests and examples.
pub struct InMemoryStore {
    surveys: RwLock<HashMap<Uuid, Survey>>,
    questions: RwLock<Vec<SurveyQuestion>>,
    answers: RwLock<Vec<SurveyQuestionAnswer>>,
    query_results: RwLock<HashMap<String, Vec<QueryRow>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            surveys: RwLock::new(HashMap::new()),
            questions: RwLock::new(Vec::new()),
            answers: RwLock::new(Vec::new()),
            query_results: RwLock::new(HashMap::new()),
        }
    }

    /// Make `execute_query(query)` return `rows`. Matching ignores
    /// surrounding whitespace.
    pub fn register_query_result(&self, query: &str, rows: Vec<QueryRow>) {
        self.query_results
            .write()
            .unwrap()
            .insert(query.trim().to_string(), rows);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The base tables an ingested survey database exposes.
pub fn survey_tables() -> Vec<TableSchema> {
    fn col(name: &str, data_type: &str, nullable: bool) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
        }
    }

    vec![
        TableSchema {
            name: "Survey".to_string(),
            columns: vec![
                col("Id", "TEXT", false),
                col("Filename", "TEXT", false),
                col("Version", "TEXT", false),
            ],
        },
        TableSchema {
            name: "SurveyQuestion".to_string(),
            columns: vec![
                col("Id", "TEXT", false),
                col("SurveyId", "TEXT", false),
                col("Question", "TEXT", false),
                col("DataType", "TEXT", false),
                col("Description", "TEXT", true),
                col("Embedding", "BLOB", true),
            ],
        },
        TableSchema {
            name: "SurveyQuestionAnswer".to_string(),
            columns: vec![
                col("Id", "TEXT", false),
                col("SurveyId", "TEXT", false),
                col("SurveyResponseId", "TEXT", false),
                col("SurveyQuestionId", "TEXT", false),
                col("TextAnswer", "TEXT", true),
                col("NumericAnswer", "REAL", true),
                col("SentimentAnalysisJson", "TEXT", true),
                col("PositiveSentimentConfidenceScore", "REAL", true),
                col("NeutralSentimentConfidenceScore", "REAL", true),
                col("NegativeSentimentConfidenceScore", "REAL", true),
                col("Embedding", "BLOB", true),
            ],
        },
        TableSchema {
            name: "SurveyResponse".to_string(),
            columns: vec![col("Id", "TEXT", false), col("SurveyId", "TEXT", false)],
        },
    ]
}

fn sort_by_text_then_id(questions: &mut [SurveyQuestion]) {
    questions.sort_by(|a, b| a.question.cmp(&b.question).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl SurveyStore for InMemoryStore {
    async fn list_surveys(&self) -> Result<Vec<Survey>> {
        let surveys = self.surveys.read().unwrap();
        let mut out: Vec<Survey> = surveys.values().cloned().collect();
        out.sort_by(|a, b| a.filename.cmp(&b.filename).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn get_survey(&self, id: Uuid) -> Result<Option<Survey>> {
        Ok(self.surveys.read().unwrap().get(&id).cloned())
    }

    async fn list_questions(&self, survey_id: Uuid) -> Result<Vec<SurveyQuestion>> {
        let questions = self.questions.read().unwrap();
        let mut out: Vec<SurveyQuestion> = questions
            .iter()
            .filter(|q| q.survey_id == survey_id)
            .cloned()
            .collect();
        sort_by_text_then_id(&mut out);
        Ok(out)
    }

    async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<SurveyQuestion>> {
        let questions = self.questions.read().unwrap();
        Ok(questions
            .iter()
            .filter(|q| ids.contains(&q.id))
            .cloned()
            .collect())
    }

    async fn questions_missing_embedding(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<SurveyQuestion>> {
        let questions = self.questions.read().unwrap();
        let mut out: Vec<SurveyQuestion> = questions
            .iter()
            .filter(|q| q.embedding.is_none())
            .cloned()
            .collect();
        out.sort_by_key(|q| q.id);
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn semantic_question_candidates(
        &self,
        survey_id: Uuid,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SemanticCandidate>> {
        let questions = self.questions.read().unwrap();
        let embedded: Vec<(Uuid, &Vec<f32>)> = questions
            .iter()
            .filter(|q| q.survey_id == survey_id)
            .filter_map(|q| q.embedding.as_ref().map(|v| (q.id, v)))
            .collect();
        let mut out: Vec<SemanticCandidate> = embedded
            .iter()
            .filter(|(_, v)| v.len() == query_vec.len())
            .map(|(id, v)| SemanticCandidate {
                id: *id,
                distance: cosine_distance(query_vec, v),
            })
            .collect();
        if out.len() < embedded.len() {
            warn!(
                %survey_id,
                skipped = embedded.len() - out.len(),
                dims = query_vec.len(),
                "skipped question embeddings of a different dimension"
            );
        }
        out.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn keyword_question_candidates(
        &self,
        survey_id: Uuid,
        query: &str,
        limit: usize,
        embedded_only: bool,
    ) -> Result<Vec<KeywordCandidate>> {
        let terms = keyword_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let questions = self.questions.read().unwrap();
        let mut out: Vec<KeywordCandidate> = questions
            .iter()
            .filter(|q| q.survey_id == survey_id)
            .filter(|q| !embedded_only || q.embedding.is_some())
            .filter_map(|q| {
                let haystack = keyword_terms(&q.embedding_text());
                let hits = terms.iter().filter(|t| haystack.contains(t)).count();
                (hits > 0).then(|| KeywordCandidate {
                    id: q.id,
                    relevance: hits as f64,
                })
            })
            .collect();
        out.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn semantic_answer_candidates(
        &self,
        survey_id: Uuid,
        query_vec: &[f32],
        filters: &[AnswerFilter],
    ) -> Result<Vec<AnswerCandidate>> {
        let answers = self.answers.read().unwrap();
        Ok(answers
            .iter()
            .filter(|a| a.survey_id == survey_id && a.text_answer().is_some())
            .filter(|a| filters.iter().all(|f| f.matches(a)))
            .filter_map(|a| {
                a.embedding
                    .as_ref()
                    .filter(|v| v.len() == query_vec.len())
                    .map(|v| AnswerCandidate {
                        answer: a.clone(),
                        distance: cosine_distance(query_vec, v),
                    })
            })
            .collect())
    }

    async fn execute_query(&self, query: &str) -> Result<Vec<QueryRow>> {
        let results = self.query_results.read().unwrap();
        results
            .get(query.trim())
            .cloned()
            .ok_or_else(|| CoreError::QueryExecution {
                query: query.to_string(),
                message: "no result registered for query".to_string(),
            })
    }

    async fn describe_tables(&self) -> Result<Vec<TableSchema>> {
        Ok(survey_tables())
    }

    async fn upsert_survey(&self, survey: &Survey) -> Result<()> {
        self.surveys
            .write()
            .unwrap()
            .insert(survey.id, survey.clone());
        Ok(())
    }

    async fn upsert_question(&self, question: &SurveyQuestion) -> Result<()> {
        let mut questions = self.questions.write().unwrap();
        questions.retain(|q| q.id != question.id);
        questions.push(question.clone());
        Ok(())
    }

    async fn upsert_answer(&self, answer: &SurveyQuestionAnswer) -> Result<()> {
        let mut answers = self.answers.write().unwrap();
        answers.retain(|a| a.id != answer.id);
        answers.push(answer.clone());
        Ok(())
    }

    async fn set_question_embedding(&self, question_id: Uuid, vector: &[f32]) -> Result<()> {
        let mut questions = self.questions.write().unwrap();
        let question = questions
            .iter_mut()
            .find(|q| q.id == question_id)
            .ok_or_else(|| CoreError::not_found(format!("question {}", question_id)))?;
        question.embedding = Some(vector.to_vec());
        Ok(())
    }
}

//! SQLite-backed [`SurveyStore`] implementation.
//!
//! Ids are stored as lowercase hyphenated UUID text and embeddings as
//! little-endian `f32` BLOBs. Embeddings written by the CSV ingestion tool
//! as JSON number arrays are read too. Cosine distance is computed in
//! process over the survey's embedded rows of the query's dimension;
//! keyword relevance comes from FTS5 `bm25` over `survey_question_fts`.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use tracing::warn;
use uuid::Uuid;

use survey_chat_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use survey_chat_core::error::{CoreError, Result};
use survey_chat_core::fusion::{KeywordCandidate, SemanticCandidate};
use survey_chat_core::models::{
    QueryRow, ScalarValue, SentimentScores, Survey, SurveyQuestion, SurveyQuestionAnswer,
};
use survey_chat_core::store::{
    keyword_terms, AnswerCandidate, AnswerFilter, ColumnSchema, FilterValue, SurveyStore,
    TableSchema,
};

/// Tables that back search and history and are never shown to the model.
const INTERNAL_TABLE_PREFIXES: &[&str] = &["sqlite_", "survey_question_fts", "conversation_history", "_sqlx"];

/// SQLite implementation of the [`SurveyStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn store_err(e: sqlx::Error) -> CoreError {
    CoreError::Store(e.to_string())
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| CoreError::Store(format!("invalid id '{}': {}", raw, e)))
}

fn survey_from_row(row: &SqliteRow) -> Result<Survey> {
    let id: String = row.try_get("Id").map_err(store_err)?;
    Ok(Survey {
        id: parse_id(&id)?,
        filename: row.try_get("Filename").map_err(store_err)?,
        version: row.try_get("Version").map_err(store_err)?,
    })
}

/// Decode an `Embedding` cell stored as an `f32` BLOB or as JSON text.
fn embedding_at(row: &SqliteRow, column: &str) -> Result<Option<Vec<f32>>> {
    let raw = row.try_get_raw(column).map_err(store_err)?;
    if raw.is_null() {
        return Ok(None);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    match type_name.as_str() {
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get(column).map_err(store_err)?;
            if bytes.len() % 4 != 0 {
                return Err(CoreError::Store(format!(
                    "{} blob of {} bytes is not an f32 vector",
                    column,
                    bytes.len()
                )));
            }
            Ok(Some(blob_to_vec(&bytes)))
        }
        "TEXT" => {
            let text: String = row.try_get(column).map_err(store_err)?;
            serde_json::from_str::<Vec<f32>>(&text)
                .map(Some)
                .map_err(|e| {
                    CoreError::Store(format!("{} text is not a JSON number array: {}", column, e))
                })
        }
        other => Err(CoreError::Store(format!(
            "{} has unsupported storage class {}",
            column, other
        ))),
    }
}

fn question_from_row(row: &SqliteRow) -> Result<SurveyQuestion> {
    let id: String = row.try_get("Id").map_err(store_err)?;
    let survey_id: String = row.try_get("SurveyId").map_err(store_err)?;
    let data_type: String = row.try_get("DataType").map_err(store_err)?;
    let embedding = embedding_at(row, "Embedding")?;

    Ok(SurveyQuestion {
        id: parse_id(&id)?,
        survey_id: parse_id(&survey_id)?,
        question: row.try_get("Question").map_err(store_err)?,
        data_type: data_type.parse()?,
        description: row.try_get("Description").map_err(store_err)?,
        embedding,
    })
}

fn answer_from_row(row: &SqliteRow) -> Result<SurveyQuestionAnswer> {
    let id: String = row.try_get("Id").map_err(store_err)?;
    let survey_id: String = row.try_get("SurveyId").map_err(store_err)?;
    let response_id: String = row.try_get("SurveyResponseId").map_err(store_err)?;
    let question_id: String = row.try_get("SurveyQuestionId").map_err(store_err)?;
    let embedding = embedding_at(row, "Embedding")?;

    let answer = SurveyQuestionAnswer::from_columns(
        parse_id(&id)?,
        parse_id(&survey_id)?,
        parse_id(&response_id)?,
        parse_id(&question_id)?,
        row.try_get("TextAnswer").map_err(store_err)?,
        row.try_get("NumericAnswer").map_err(store_err)?,
    )?
    .with_sentiment(SentimentScores {
        positive: row
            .try_get("PositiveSentimentConfidenceScore")
            .map_err(store_err)?,
        neutral: row
            .try_get("NeutralSentimentConfidenceScore")
            .map_err(store_err)?,
        negative: row
            .try_get("NegativeSentimentConfidenceScore")
            .map_err(store_err)?,
    });

    Ok(match embedding {
        Some(vector) => answer.with_embedding(vector),
        None => answer,
    })
}

/// Decode one cell by its runtime storage class.
fn scalar_at(row: &SqliteRow, index: usize) -> std::result::Result<ScalarValue, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(ScalarValue::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    Ok(match type_name.as_str() {
        "INTEGER" | "INT8" | "BIGINT" => ScalarValue::Integer(row.try_get(index)?),
        "BOOLEAN" => ScalarValue::Bool(row.try_get(index)?),
        "REAL" | "NUMERIC" => ScalarValue::Number(row.try_get(index)?),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get(index)?;
            ScalarValue::Text(format!("<blob {} bytes>", bytes.len()))
        }
        _ => ScalarValue::Text(row.try_get(index)?),
    })
}

fn query_row(row: &SqliteRow) -> std::result::Result<QueryRow, sqlx::Error> {
    let mut columns = Vec::with_capacity(row.columns().len());
    for column in row.columns() {
        columns.push((
            column.name().to_string(),
            scalar_at(row, column.ordinal())?,
        ));
    }
    Ok(QueryRow::new(columns))
}

/// Backend message of a failed query, without sqlx's wrapper text.
fn backend_message(e: &sqlx::Error) -> String {
    match e {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}

/// FTS5 query matching any term: `"nps" OR "score"`.
fn fts_query(text: &str) -> Option<String> {
    let terms = keyword_terms(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

const QUESTION_COLUMNS: &str = "Id, SurveyId, Question, DataType, Description, Embedding";

#[async_trait]
impl SurveyStore for SqliteStore {
    async fn list_surveys(&self) -> Result<Vec<Survey>> {
        let rows = sqlx::query("SELECT Id, Filename, Version FROM Survey ORDER BY Filename, Id")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        rows.iter().map(survey_from_row).collect()
    }

    async fn get_survey(&self, id: Uuid) -> Result<Option<Survey>> {
        let row = sqlx::query("SELECT Id, Filename, Version FROM Survey WHERE Id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.as_ref().map(survey_from_row).transpose()
    }

    async fn list_questions(&self, survey_id: Uuid) -> Result<Vec<SurveyQuestion>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM SurveyQuestion WHERE SurveyId = ? ORDER BY Question, Id",
            QUESTION_COLUMNS
        ))
        .bind(survey_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(question_from_row).collect()
    }

    async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<SurveyQuestion>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM SurveyQuestion WHERE Id IN ({})",
            QUESTION_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;

        rows.iter().map(question_from_row).collect()
    }

    async fn questions_missing_embedding(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<SurveyQuestion>> {
        // A negative LIMIT means no limit in SQLite
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM SurveyQuestion WHERE Embedding IS NULL ORDER BY Id LIMIT ?",
            QUESTION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(question_from_row).collect()
    }

    async fn semantic_question_candidates(
        &self,
        survey_id: Uuid,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SemanticCandidate>> {
        let rows = sqlx::query(
            "SELECT Id, Embedding FROM SurveyQuestion WHERE SurveyId = ? AND Embedding IS NOT NULL",
        )
        .bind(survey_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut candidates = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;
        for row in &rows {
            let id: String = row.try_get("Id").map_err(store_err)?;
            let Some(vector) = embedding_at(row, "Embedding")? else {
                continue;
            };
            if vector.len() != query_vec.len() {
                skipped += 1;
                continue;
            }
            candidates.push(SemanticCandidate {
                id: parse_id(&id)?,
                distance: cosine_distance(query_vec, &vector),
            });
        }
        if skipped > 0 {
            warn!(
                %survey_id,
                skipped,
                dims = query_vec.len(),
                "skipped question embeddings of a different dimension"
            );
        }

        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn keyword_question_candidates(
        &self,
        survey_id: Uuid,
        query: &str,
        limit: usize,
        embedded_only: bool,
    ) -> Result<Vec<KeywordCandidate>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT q.Id AS Id, survey_question_fts.rank AS rank
            FROM survey_question_fts
            JOIN SurveyQuestion q ON q.Id = survey_question_fts.question_id
            WHERE survey_question_fts MATCH ?
              AND q.SurveyId = ?
              AND (? = 0 OR q.Embedding IS NOT NULL)
            ORDER BY rank, q.Id
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(survey_id.to_string())
        .bind(embedded_only)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("Id").map_err(store_err)?;
                let rank: f64 = row.try_get("rank").map_err(store_err)?;
                Ok(KeywordCandidate {
                    id: parse_id(&id)?,
                    relevance: -rank,
                })
            })
            .collect()
    }

    async fn semantic_answer_candidates(
        &self,
        survey_id: Uuid,
        query_vec: &[f32],
        filters: &[AnswerFilter],
    ) -> Result<Vec<AnswerCandidate>> {
        let mut sql = String::from(
            r#"
            SELECT Id, SurveyId, SurveyResponseId, SurveyQuestionId, TextAnswer, NumericAnswer,
                   PositiveSentimentConfidenceScore, NeutralSentimentConfidenceScore,
                   NegativeSentimentConfidenceScore, Embedding
            FROM SurveyQuestionAnswer
            WHERE SurveyId = ? AND TextAnswer IS NOT NULL AND Embedding IS NOT NULL
            "#,
        );
        for filter in filters {
            filter.validate()?;
            // column and operator come from closed enums; the value is bound
            sql.push_str(&format!(
                " AND {} {} ?",
                filter.column.column_name(),
                filter.operator.sql()
            ));
        }

        let mut query = sqlx::query(&sql).bind(survey_id.to_string());
        for filter in filters {
            query = match &filter.value {
                FilterValue::Text(t) => query.bind(t.to_ascii_lowercase()),
                FilterValue::Number(n) => query.bind(*n),
            };
        }
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;

        let mut candidates = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;
        for row in &rows {
            let answer = answer_from_row(row)?;
            let distance = match answer.embedding.as_deref() {
                Some(v) if v.len() == query_vec.len() => cosine_distance(query_vec, v),
                _ => {
                    skipped += 1;
                    continue;
                }
            };
            candidates.push(AnswerCandidate { answer, distance });
        }
        if skipped > 0 {
            warn!(
                %survey_id,
                skipped,
                dims = query_vec.len(),
                "skipped answer embeddings of a different dimension"
            );
        }
        Ok(candidates)
    }

    async fn execute_query(&self, query: &str) -> Result<Vec<QueryRow>> {
        let to_err = |e: sqlx::Error| CoreError::QueryExecution {
            query: query.to_string(),
            message: backend_message(&e),
        };

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(to_err)?;

        rows.iter()
            .map(|row| query_row(row).map_err(to_err))
            .collect()
    }

    async fn describe_tables(&self) -> Result<Vec<TableSchema>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut tables = Vec::new();
        for name in names {
            if INTERNAL_TABLE_PREFIXES.iter().any(|p| name.starts_with(p)) {
                continue;
            }
            let rows = sqlx::query(
                r#"SELECT name, type, "notnull" FROM pragma_table_info(?) ORDER BY cid"#,
            )
            .bind(&name)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

            let columns = rows
                .iter()
                .map(|row| {
                    let data_type: String = row.try_get("type").map_err(store_err)?;
                    let not_null: i64 = row.try_get("notnull").map_err(store_err)?;
                    Ok(ColumnSchema {
                        name: row.try_get("name").map_err(store_err)?,
                        data_type: if data_type.is_empty() {
                            "ANY".to_string()
                        } else {
                            data_type.to_ascii_uppercase()
                        },
                        nullable: not_null == 0,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            tables.push(TableSchema { name, columns });
        }
        Ok(tables)
    }

    async fn upsert_survey(&self, survey: &Survey) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO Survey (Id, Filename, Version)
            VALUES (?, ?, ?)
            ON CONFLICT(Id) DO UPDATE SET
                Filename = excluded.Filename,
                Version = excluded.Version
            "#,
        )
        .bind(survey.id.to_string())
        .bind(&survey.filename)
        .bind(&survey.version)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn upsert_question(&self, question: &SurveyQuestion) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO SurveyQuestion (Id, SurveyId, Question, DataType, Description, Embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(Id) DO UPDATE SET
                SurveyId = excluded.SurveyId,
                Question = excluded.Question,
                DataType = excluded.DataType,
                Description = excluded.Description,
                Embedding = excluded.Embedding
            "#,
        )
        .bind(question.id.to_string())
        .bind(question.survey_id.to_string())
        .bind(&question.question)
        .bind(question.data_type.as_str())
        .bind(&question.description)
        .bind(question.embedding.as_deref().map(vec_to_blob))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn upsert_answer(&self, answer: &SurveyQuestionAnswer) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query("INSERT OR IGNORE INTO SurveyResponse (Id, SurveyId) VALUES (?, ?)")
            .bind(answer.survey_response_id.to_string())
            .bind(answer.survey_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        sqlx::query(
            r#"
            INSERT INTO SurveyQuestionAnswer (
                Id, SurveyId, SurveyResponseId, SurveyQuestionId, TextAnswer, NumericAnswer,
                PositiveSentimentConfidenceScore, NeutralSentimentConfidenceScore,
                NegativeSentimentConfidenceScore, Embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(Id) DO UPDATE SET
                SurveyId = excluded.SurveyId,
                SurveyResponseId = excluded.SurveyResponseId,
                SurveyQuestionId = excluded.SurveyQuestionId,
                TextAnswer = excluded.TextAnswer,
                NumericAnswer = excluded.NumericAnswer,
                PositiveSentimentConfidenceScore = excluded.PositiveSentimentConfidenceScore,
                NeutralSentimentConfidenceScore = excluded.NeutralSentimentConfidenceScore,
                NegativeSentimentConfidenceScore = excluded.NegativeSentimentConfidenceScore,
                Embedding = excluded.Embedding
            "#,
        )
        .bind(answer.id.to_string())
        .bind(answer.survey_id.to_string())
        .bind(answer.survey_response_id.to_string())
        .bind(answer.survey_question_id.to_string())
        .bind(answer.text_answer())
        .bind(answer.numeric_answer())
        .bind(answer.sentiment.positive)
        .bind(answer.sentiment.neutral)
        .bind(answer.sentiment.negative)
        .bind(answer.embedding.as_deref().map(vec_to_blob))
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn set_question_embedding(&self, question_id: Uuid, vector: &[f32]) -> Result<()> {
        let result = sqlx::query("UPDATE SurveyQuestion SET Embedding = ? WHERE Id = ?")
            .bind(vec_to_blob(vector))
            .bind(question_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("question {}", question_id)));
        }
        Ok(())
    }
}

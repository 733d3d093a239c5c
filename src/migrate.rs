//! Idempotent schema migrations.
//!
//! The survey tables use the same names and columns the CSV ingestion tool
//! writes. Keyword search runs over the `survey_question_fts` FTS5 table,
//! kept in sync with `SurveyQuestion` by triggers so rows written directly
//! by the ingestion tool are indexed too.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table, index and trigger that does not exist yet.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS Survey (
            Id TEXT PRIMARY KEY NOT NULL,
            Filename TEXT NOT NULL,
            Version TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS SurveyResponse (
            Id TEXT PRIMARY KEY NOT NULL,
            SurveyId TEXT NOT NULL REFERENCES Survey(Id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS SurveyQuestion (
            Id TEXT PRIMARY KEY NOT NULL,
            SurveyId TEXT NOT NULL REFERENCES Survey(Id),
            Question TEXT NOT NULL,
            DataType TEXT NOT NULL,
            Description TEXT,
            Embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS SurveyQuestionAnswer (
            Id TEXT PRIMARY KEY NOT NULL,
            SurveyId TEXT NOT NULL REFERENCES Survey(Id),
            SurveyResponseId TEXT NOT NULL REFERENCES SurveyResponse(Id),
            SurveyQuestionId TEXT NOT NULL REFERENCES SurveyQuestion(Id),
            TextAnswer TEXT,
            NumericAnswer REAL,
            SentimentAnalysisJson TEXT,
            PositiveSentimentConfidenceScore REAL,
            NeutralSentimentConfidenceScore REAL,
            NegativeSentimentConfidenceScore REAL,
            Embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT,
            messages_json TEXT NOT NULL DEFAULT '[]',
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='survey_question_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE survey_question_fts USING fts5(
                question_id UNINDEXED,
                question,
                description
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Index questions written before the table existed
        sqlx::query(
            r#"
            INSERT INTO survey_question_fts (question_id, question, description)
            SELECT Id, Question, COALESCE(Description, '') FROM SurveyQuestion
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS survey_question_fts_insert
        AFTER INSERT ON SurveyQuestion BEGIN
            INSERT INTO survey_question_fts (question_id, question, description)
            VALUES (new.Id, new.Question, COALESCE(new.Description, ''));
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS survey_question_fts_update
        AFTER UPDATE OF Question, Description ON SurveyQuestion BEGIN
            DELETE FROM survey_question_fts WHERE question_id = old.Id;
            INSERT INTO survey_question_fts (question_id, question, description)
            VALUES (new.Id, new.Question, COALESCE(new.Description, ''));
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS survey_question_fts_delete
        AFTER DELETE ON SurveyQuestion BEGIN
            DELETE FROM survey_question_fts WHERE question_id = old.Id;
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_question_survey ON SurveyQuestion(SurveyId)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_answer_survey_question ON SurveyQuestionAnswer(SurveyId, SurveyQuestionId)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_response_survey ON SurveyResponse(SurveyId)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_history_user ON conversation_history(user_id, updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
